pub mod gender;
pub mod normalize;
pub mod prefilter;
