pub mod builder;
pub mod embed;
pub mod normalize;
pub mod similarity;
