//! MNIST in the gzip-compressed IDX format
//!
//! Files are looked up in `<path>/mnist`, where `path` defaults to the OS
//! "Downloads" directory (or the temp directory). With the `download`
//! feature, missing files are fetched once and reused afterwards.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use ndarray::prelude::*;
use ndarray::NdFloat;

use crate::error::{Error, Result};

const NAMES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

const IMAGE_SIDE: usize = 28;

/// Type code of unsigned bytes in the IDX header.
const IDX_U8: u8 = 0x08;

/// Reads an uncompressed IDX stream of unsigned bytes.
///
/// The header is two zero bytes, the type code `0x08`, the number of
/// dimensions and one big-endian `u32` per dimension.
pub fn read_idx<R: Read>(mut reader: R) -> Result<ArrayD<u8>> {
    let zero = reader.read_u16::<BigEndian>()?;
    let code = reader.read_u8()?;
    if zero != 0 || code != IDX_U8 {
        return Err(Error::Dataset(format!(
            "bad IDX magic {:#06x}{:02x}, expected unsigned bytes",
            zero, code
        )));
    }
    let ndim = reader.read_u8()? as usize;
    let shape = (0..ndim)
        .map(|_| Ok(reader.read_u32::<BigEndian>()? as usize))
        .collect::<Result<Vec<_>>>()?;
    let len = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::Dataset(format!("IDX header {:?} is too large", shape)))?;
    // the header is untrusted, read at most one byte past the claimed size
    let mut data = Vec::new();
    reader.take((len as u64).saturating_add(1)).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(Error::Dataset(format!(
            "IDX payload has {} bytes, header {:?} needs {}",
            data.len(),
            shape,
            len
        )));
    }
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| Error::Dataset(e.to_string()))
}

/// [`read_idx`] of a gzip-compressed file.
pub fn read_idx_gz(path: &Path) -> Result<ArrayD<u8>> {
    read_idx(GzDecoder::new(File::open(path)?))
}

/// Mnist builder.
pub mod builders {
    use super::{Mnist, Result};
    use std::path::Path;

    #[derive(Debug, Default)]
    pub struct MnistBuilder<'a> {
        pub(super) path: Option<&'a Path>,
        pub(super) download: bool,
    }

    impl MnistBuilder<'_> {
        /// The folder containing the `mnist` directory.
        pub fn path(self, path: &Path) -> MnistBuilder {
            MnistBuilder {
                path: Some(path),
                download: self.download,
            }
        }

        /// Whether to download missing files. Defaults to false.
        pub fn download(self, download: bool) -> Self {
            Self { download, ..self }
        }

        /// **Errors**
        /// - A file is missing and cannot be downloaded.
        /// - Decompressing or parsing a file failed.
        pub fn build(&self) -> Result<Mnist> {
            Mnist::build(self)
        }
    }
}
use builders::MnistBuilder;

/// The MNIST digits, train images first.
#[derive(Clone, Debug)]
pub struct Mnist {
    images: Array4<u8>,
    classes: Array1<u8>,
    train_len: usize,
}

impl Mnist {
    pub fn builder() -> MnistBuilder<'static> {
        MnistBuilder::default()
    }

    fn build(builder: &MnistBuilder) -> Result<Self> {
        let dir = builder
            .path
            .map(Path::to_owned)
            .unwrap_or_else(|| dirs::download_dir().unwrap_or_else(std::env::temp_dir))
            .join("mnist");
        let paths: Vec<PathBuf> = NAMES
            .iter()
            .map(|name| dir.join(name).with_extension("gz"))
            .collect();
        let missing: Vec<&PathBuf> = paths.iter().filter(|p| !p.exists()).collect();
        if !missing.is_empty() {
            if !builder.download {
                return Err(Error::Dataset(format!(
                    "{} not found, build with download(true) to fetch it",
                    missing[0].display()
                )));
            }
            fs::create_dir_all(&dir)?;
            for path in missing {
                fetch(path)?;
            }
        }

        let mut images = Vec::new();
        let mut classes = Vec::new();
        let mut train_len = 0;
        let mut split_len = 0;
        for (i, path) in paths.iter().enumerate() {
            let array = read_idx_gz(path)?;
            let is_images = i % 2 == 0;
            if is_images {
                if array.ndim() != 3 || array.shape()[1..] != [IMAGE_SIDE, IMAGE_SIDE] {
                    return Err(Error::Dataset(format!(
                        "{}: expected 28x28 images, found shape {:?}",
                        path.display(),
                        array.shape()
                    )));
                }
                split_len = array.shape()[0];
                if i == 0 {
                    train_len = split_len;
                }
                images.extend(array.iter().copied());
            } else {
                if array.ndim() != 1 {
                    return Err(Error::Dataset(format!(
                        "{}: expected labels, found shape {:?}",
                        path.display(),
                        array.shape()
                    )));
                }
                if array.len() != split_len {
                    return Err(Error::Dataset(format!(
                        "{}: {} labels for {} images",
                        path.display(),
                        array.len(),
                        split_len
                    )));
                }
                if let Some(&c) = array.iter().find(|&&c| c > 9) {
                    return Err(Error::Dataset(format!("{}: label {} > 9", path.display(), c)));
                }
                classes.extend(array.iter().copied());
            }
        }
        let n = classes.len();
        if images.len() != n * IMAGE_SIDE * IMAGE_SIDE {
            return Err(Error::Dataset(format!(
                "{} labels for {} images",
                n,
                images.len() / (IMAGE_SIDE * IMAGE_SIDE)
            )));
        }
        log::debug!("loaded mnist from {}: {} train, {} test", dir.display(), train_len, n - train_len);
        let images = Array4::from_shape_vec((n, 1, IMAGE_SIDE, IMAGE_SIDE), images)
            .map_err(|e| Error::Dataset(e.to_string()))?;
        Ok(Mnist {
            images,
            classes: Array1::from(classes),
            train_len,
        })
    }

    /// Shape = `[n, 1, 28, 28]`.
    pub fn images(&self) -> ArrayView4<'_, u8> {
        self.images.view()
    }

    /// Shape = `[n]`, values in `0..=9`.
    pub fn classes(&self) -> ArrayView1<'_, u8> {
        self.classes.view()
    }

    pub fn train(&self) -> (ArrayView4<'_, u8>, ArrayView1<'_, u8>) {
        (
            self.images.slice(s![..self.train_len, .., .., ..]),
            self.classes.slice(s![..self.train_len]),
        )
    }

    pub fn test(&self) -> (ArrayView4<'_, u8>, ArrayView1<'_, u8>) {
        (
            self.images.slice(s![self.train_len.., .., .., ..]),
            self.classes.slice(s![self.train_len..]),
        )
    }
}

/// Pixel values scaled to `[0, 1]`.
pub fn to_float<A: NdFloat, D: Dimension>(images: ArrayView<u8, D>) -> Array<A, D> {
    let scale = A::one() / A::from(255).unwrap();
    images.mapv(|v| A::from(v).unwrap() * scale)
}

/// Classes as label indices for [`crate::nn::Mlp::fit`].
pub fn to_labels(classes: ArrayView1<u8>) -> Array1<usize> {
    classes.mapv(usize::from)
}

#[cfg(feature = "download")]
fn fetch(path: &Path) -> Result<()> {
    use std::io::Write;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Dataset(format!("bad file name {}", path.display())))?;
    let url = format!("https://ossci-datasets.s3.amazonaws.com/mnist/{}", name);
    log::info!("downloading {}", url);

    let mut bytes = Vec::new();
    let mut easy = curl::easy::Easy::new();
    let curl_err = |e: curl::Error| Error::Dataset(format!("{}: {}", url, e));
    easy.url(&url).map_err(curl_err)?;
    easy.follow_location(true).map_err(curl_err)?;
    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                bytes.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(curl_err)?;
        transfer.perform().map_err(curl_err)?;
    }
    let code = easy.response_code().map_err(curl_err)?;
    if code != 200 {
        return Err(Error::Dataset(format!("{}: HTTP status {}", url, code)));
    }
    // write to a temporary name first so an interrupted download is not cached
    let partial = path.with_extension("part");
    File::create(&partial)?.write_all(&bytes)?;
    fs::rename(&partial, path)?;
    Ok(())
}

#[cfg(not(feature = "download"))]
fn fetch(path: &Path) -> Result<()> {
    Err(Error::Dataset(format!(
        "{} not found and the `download` feature is disabled",
        path.display()
    )))
}
