use crate::file::File;
use crate::Error;
use alloc::string::String;

pub mod initrd;

pub trait FileSystem {
    fn volume_label(&self) -> String;
    fn open_file(&'static self, path: &str) -> Result<File, Error>;
}
