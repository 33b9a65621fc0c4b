pub mod guard;
pub mod phash;
