pub mod audio;
#[cfg(feature = "native")]
pub mod device;
