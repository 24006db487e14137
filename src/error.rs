use crate::region::Region;
use crate::volume_loader::SeriesReadError;
use crate::writer::SeriesWriteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Region {region} does not fit a volume of (x, y, z) = {dim:?}")]
    OutOfBounds {
        region: Region,
        dim: (usize, usize, usize),
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("All voxels share intensity {0}, no threshold separates them")]
    DegenerateHistogram(u8),

    #[error("Rod {0} encloses no voxels")]
    EmptySample(usize),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    SeriesRead(#[from] SeriesReadError),

    #[error(transparent)]
    SeriesWrite(#[from] SeriesWriteError),
}

pub type Result<T> = std::result::Result<T, Error>;
