use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt};
use nalgebra::{DMatrix, DVector};
use tracing::info;

use crate::error::DataError;

pub const IMAGE_SIDE: usize = 28;
pub const IMAGE_LEN: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const NUM_DIGITS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
enum DataType {
    UnsignedByte,
    SignedByte,
    Short,
    Int,
    Float,
    Double,
    Unknown,
}

impl From<u32> for DataType {
    fn from(v: u32) -> Self {
        match (v >> 8) & 0xFF {
            0x08 => Self::UnsignedByte,
            0x09 => Self::SignedByte,
            0x0B => Self::Short,
            0x0C => Self::Int,
            0x0D => Self::Float,
            0x0E => Self::Double,
            _ => Self::Unknown,
        }
    }
}

fn check_magic(file: &str, magic: u32, dims: u32) -> Result<(), DataError> {
    if DataType::from(magic) != DataType::UnsignedByte || magic & 0xFF != dims {
        return Err(DataError::BadMagic {
            file: file.to_owned(),
            expected: dims,
            magic,
        });
    }

    Ok(())
}

/// Reads exactly `expected` bytes; the header count is not trusted for allocation.
fn read_payload(file: &str, src: &mut impl Read, expected: usize) -> Result<Vec<u8>, DataError> {
    let mut data = Vec::new();
    src.take(expected as u64).read_to_end(&mut data)?;

    if data.len() != expected {
        return Err(DataError::Truncated {
            file: file.to_owned(),
            expected,
            got: data.len(),
        });
    }

    Ok(data)
}

fn parse_images(file: &str, src: &mut impl Read) -> Result<DMatrix<f32>, DataError> {
    let magic = src.read_u32::<BigEndian>()?;

    check_magic(file, magic, 3)?;

    let count = src.read_u32::<BigEndian>()?;
    let rows = src.read_u32::<BigEndian>()?;
    let cols = src.read_u32::<BigEndian>()?;

    if rows as usize != IMAGE_SIDE || cols as usize != IMAGE_SIDE {
        return Err(DataError::ImageSize { rows, cols });
    }

    let data = read_payload(file, src, (count as usize).saturating_mul(IMAGE_LEN))?;

    Ok(DMatrix::from_iterator(
        IMAGE_LEN,
        count as usize,
        data.into_iter().map(|v| (v as f32) / 255.0),
    ))
}

fn parse_labels(file: &str, src: &mut impl Read) -> Result<DVector<u8>, DataError> {
    let magic = src.read_u32::<BigEndian>()?;

    check_magic(file, magic, 1)?;

    let count = src.read_u32::<BigEndian>()?;

    let data = read_payload(file, src, count as usize)?;

    Ok(DVector::from_vec(data))
}

/// One split of the base digit dataset: a 784-row column per image, pixels in [0, 1].
#[derive(Clone, Debug)]
pub struct DigitSet {
    pub images: DMatrix<f32>,
    pub labels: DVector<u8>,
}

impl DigitSet {
    pub fn new(images: DMatrix<f32>, labels: DVector<u8>) -> Result<Self, DataError> {
        if images.nrows() != IMAGE_LEN {
            return Err(DataError::ImageSize {
                rows: images.nrows() as u32,
                cols: 1,
            });
        }

        if images.ncols() != labels.len() {
            return Err(DataError::CountMismatch {
                images: images.ncols(),
                labels: labels.len(),
            });
        }

        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|&(_, &label)| label as usize >= NUM_DIGITS)
        {
            return Err(DataError::BadLabel { index, label });
        }

        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn read(dir: &Path, images_file: &str, labels_file: &str) -> Result<Self, DataError> {
        let mut images = BufReader::new(File::open(dir.join(images_file))?);
        let mut labels = BufReader::new(File::open(dir.join(labels_file))?);

        Self::new(
            parse_images(images_file, &mut images)?,
            parse_labels(labels_file, &mut labels)?,
        )
    }
}

#[derive(Clone, Debug)]
pub struct MNISTData {
    pub training: DigitSet,
    pub test: DigitSet,
}

impl MNISTData {
    /// Reads the four uncompressed IDX files from `dir`.
    pub fn parse(dir: &Path) -> Result<Self, DataError> {
        let training = DigitSet::read(dir, "train-images-idx3-ubyte", "train-labels-idx1-ubyte")?;
        let test = DigitSet::read(dir, "t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte")?;

        info!(
            training = training.len(),
            test = test.len(),
            "loaded MNIST digits from {}",
            dir.display()
        );

        Ok(Self { training, test })
    }
}
