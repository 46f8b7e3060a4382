pub mod cascade;
pub mod detector;
pub mod face_mesh;
pub mod regression;

#[cfg(test)]
pub(crate) mod testing;
