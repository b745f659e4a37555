use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::LoadError;
use crate::state::MEMORY_MAX;

/// Byte order of words in a binary image file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endian {
    /// Whatever the host uses
    #[default]
    Native,
    Little,
    Big,
}

impl Endian {
    fn word_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Native => u16::from_ne_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }

    fn word_to(self, word: u16) -> [u8; 2] {
        match self {
            Endian::Native => word.to_ne_bytes(),
            Endian::Little => word.to_le_bytes(),
            Endian::Big => word.to_be_bytes(),
        }
    }
}

impl FromStr for Endian {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Endian::Native),
            "little" | "le" => Ok(Endian::Little),
            "big" | "be" => Ok(Endian::Big),
            _ => Err(format!(
                "Unknown byte order '{}', expected native, little or big",
                s
            )),
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endian::Native => "native",
            Endian::Little => "little",
            Endian::Big => "big",
        };
        f.write_str(name)
    }
}

/// Program ready to be copied into memory: a load address and the words placed there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    origin: u16,
    words: Vec<u16>,
}

impl Image {
    /// Fails if the words would run past the end of memory.
    pub fn new(origin: u16, words: Vec<u16>) -> Result<Self, LoadError> {
        if origin as usize + words.len() > MEMORY_MAX {
            return Err(LoadError::TooLarge {
                origin,
                words: words.len(),
            });
        }
        Ok(Image { origin, words })
    }

    /// Decode a headerless image. Any bit pattern is accepted as code or data.
    pub fn from_bytes(bytes: &[u8], endian: Endian, origin: u16) -> Result<Self, LoadError> {
        if bytes.len() % 2 != 0 {
            return Err(LoadError::Misaligned { len: bytes.len() });
        }
        let words = bytes
            .chunks_exact(2)
            .map(|word| endian.word_from([word[0], word[1]]))
            .collect();
        Image::new(origin, words)
    }

    pub fn read_file(path: &Path, endian: Endian, origin: u16) -> Result<Self, LoadError> {
        let bytes = fs::read(path).map_err(|error| LoadError::Open {
            path: path.to_path_buf(),
            error,
        })?;
        Image::from_bytes(&bytes, endian, origin)
    }

    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        self.words
            .iter()
            .flat_map(|word| endian.word_to(*word))
            .collect()
    }

    pub fn origin(&self) -> u16 {
        self.origin
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PC_START;

    #[test]
    fn decodes_byte_orders() {
        let bytes = [0xF0, 0x25, 0x12, 0x20];
        let big = Image::from_bytes(&bytes, Endian::Big, PC_START).unwrap();
        assert_eq!(big.words(), &[0xF025, 0x1220]);
        let little = Image::from_bytes(&bytes, Endian::Little, PC_START).unwrap();
        assert_eq!(little.words(), &[0x25F0, 0x2012]);

        let native = Image::from_bytes(&0xF025u16.to_ne_bytes(), Endian::Native, PC_START);
        assert_eq!(native.unwrap().words(), &[0xF025]);
    }

    #[test]
    fn encodes_what_it_decodes() {
        let image = Image::new(0x3000, vec![0xF026, 0x1220, 0xF025]).unwrap();
        for endian in [Endian::Native, Endian::Little, Endian::Big] {
            let bytes = image.to_bytes(endian);
            assert_eq!(bytes.len(), 6);
            assert_eq!(Image::from_bytes(&bytes, endian, 0x3000).unwrap(), image);
        }
    }

    #[test]
    fn rejects_odd_length() {
        let err = Image::from_bytes(&[0x12, 0x34, 0x56], Endian::Big, PC_START).unwrap_err();
        assert!(matches!(err, LoadError::Misaligned { len: 3 }));
    }

    #[test]
    fn rejects_images_past_end_of_memory() {
        assert!(Image::new(0xFFFF, vec![0]).is_ok());
        let err = Image::new(0xFFFF, vec![0, 0]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::TooLarge {
                origin: 0xFFFF,
                words: 2
            }
        ));
    }

    #[test]
    fn missing_file() {
        let err = Image::read_file(Path::new("no/such/image.obj"), Endian::Native, PC_START);
        assert!(matches!(err, Err(LoadError::Open { .. })));
    }

    #[test]
    fn parse_endian() {
        assert_eq!("big".parse::<Endian>(), Ok(Endian::Big));
        assert_eq!("le".parse::<Endian>(), Ok(Endian::Little));
        assert_eq!(Endian::default().to_string(), "native");
        assert!("middle".parse::<Endian>().is_err());
    }
}
