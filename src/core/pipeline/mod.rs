pub mod compiling;
pub mod running;
pub mod testing;
