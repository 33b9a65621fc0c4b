pub mod chooser;
