use crate::Error;

pub trait Read {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

pub trait Write {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;
}

pub trait Seek {
    fn seek(&mut self, position: u64) -> Result<(), Error>;
    fn offset(&self) -> u64;
    fn seek_begin(&mut self) -> Result<(), Error> {
        self.seek(0)
    }
    fn seek_end(&mut self) -> Result<(), Error> {
        self.seek(self.size())
    }
    fn seek_relative(&mut self, offset: i64) -> Result<(), Error> {
        self.seek(((self.offset() as i64) + offset) as u64)
    }
    fn size(&self) -> u64;
}

pub trait RandomRead: Seek + Read {
    fn read_from(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let prev_offset = self.offset();
        self.seek(offset)?;
        let result = self.read(buf);
        self.seek(prev_offset)?;
        result
    }
}

impl<T> RandomRead for T where T: Seek + Read {}
