//! Append-only PDF serialization.
//!
//! The writer never seeks: it tracks the byte offset of every object as it
//! goes and emits the cross-reference table from those offsets at the end.

use std::io::Write;

use lopdf::{Dictionary, Object};

use crate::error::{ConvertError, Result};
use crate::pdf;

/// Whether bytes reach the sink or are only counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Enabled,
    Disabled,
}

/// `/Length` of a stream object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLength {
    /// Written inline.
    Literal,
    /// Forward reference to a length object written right after.
    Indirect(u32),
}

pub struct Writer<W: Write> {
    sink: W,
    mode: OutputMode,
    offset: u64,
    /// Offset of object `n` at index `n - 1`.
    offsets: Vec<u64>,
    failed: bool,
}

impl<W: Write> Writer<W> {
    pub fn new(sink: W, mode: OutputMode) -> Self {
        Self {
            sink,
            mode,
            offset: 0,
            offsets: Vec::new(),
            failed: false,
        }
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of the next object to be written.
    pub fn next_object(&self) -> u32 {
        self.offsets.len() as u32 + 1
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.failed {
            return Err(ConvertError::Poisoned);
        }
        if self.mode == OutputMode::Enabled {
            if let Err(e) = self.sink.write_all(bytes) {
                self.failed = true;
                return Err(e.into());
            }
        }
        self.offset += bytes.len() as u64;
        Ok(())
    }

    pub fn header(&mut self, minor: u8) -> Result<()> {
        self.write(format!("%PDF-1.{}\n", minor).as_bytes())?;
        self.write(b"%\xE2\xE3\xCF\xD3\n")
    }

    /// Opens object `number`, which must be the next one.
    pub fn begin_object(&mut self, number: u32) -> Result<()> {
        if self.failed {
            return Err(ConvertError::Poisoned);
        }
        let expected = self.next_object();
        if number != expected {
            self.failed = true;
            return Err(ConvertError::ObjectNumbering {
                expected,
                actual: number,
            });
        }
        self.offsets.push(self.offset);
        self.write(format!("{} 0 obj\n", number).as_bytes())
    }

    pub fn end_object(&mut self) -> Result<()> {
        self.write(b"\nendobj\n")
    }

    /// Writes object `number` holding `dict`.
    pub fn dict_object(&mut self, number: u32, dict: Dictionary) -> Result<()> {
        let body = pdf::encode(Object::Dictionary(dict))?;
        self.begin_object(number)?;
        self.write(&body)?;
        self.end_object()
    }

    /// Writes a stream object, adding `/Length` to `dict`. With
    /// [`StreamLength::Indirect`] the length object follows immediately.
    pub fn stream_object(
        &mut self,
        number: u32,
        mut dict: Dictionary,
        data: &[u8],
        length: StreamLength,
    ) -> Result<()> {
        match length {
            StreamLength::Literal => dict.set("Length", Object::Integer(data.len() as i64)),
            StreamLength::Indirect(object) => dict.set("Length", Object::Reference((object, 0))),
        }
        let head = pdf::encode(Object::Dictionary(dict))?;
        self.begin_object(number)?;
        self.write(&head)?;
        self.write(b"\nstream\n")?;
        self.write(data)?;
        self.write(b"\nendstream")?;
        self.end_object()?;

        if let StreamLength::Indirect(object) = length {
            self.begin_object(object)?;
            self.write(data.len().to_string().as_bytes())?;
            self.end_object()?;
        }
        Ok(())
    }

    /// Writes the cross-reference table and trailer and hands back the sink
    /// with the total byte count.
    pub fn finish(mut self, file_id: &str) -> Result<(W, u64)> {
        if self.failed {
            return Err(ConvertError::Poisoned);
        }
        let xref_offset = self.offset;
        let count = self.offsets.len();

        let mut xref = String::with_capacity(20 * (count + 1) + 32);
        xref.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", count + 1));
        for offset in &self.offsets {
            xref.push_str(&format!("{:010} 00000 n \n", offset));
        }
        self.write(xref.as_bytes())?;

        let trailer = format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 2 0 R /ID [<{}><{}>] >>\nstartxref\n{}\n%%EOF\n",
            count + 1,
            file_id,
            file_id,
            xref_offset
        );
        self.write(trailer.as_bytes())?;

        if self.mode == OutputMode::Enabled {
            if let Err(e) = self.sink.flush() {
                self.failed = true;
                return Err(e.into());
            }
        }
        log::debug!("wrote {} objects, {} bytes", count, self.offset);
        Ok((self.sink, self.offset))
    }
}
