pub mod media;
pub mod soul;
