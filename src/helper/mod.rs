pub mod expression;
pub mod export;
pub mod normalize;
pub mod visualizer;
