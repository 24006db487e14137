//! Single-file NIfTI-1 output.

use crate::volume::{Volume, Voxel};

use bytemuck::{Pod, Zeroable};
use flate2::{Compression, write::GzEncoder};
use image::GrayImage;
use log::info;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesWriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Volume of shape {0:?} cannot be stored")]
    UnsupportedShape((usize, usize, usize)),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

const HEADER_SIZE: i32 = 348;
// Header plus the 4-byte extension flag
const VOX_OFFSET: f32 = 352.0;
const NIFTI_UNITS_MM: u8 = 2;
const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;

/// NIfTI-1 header, laid out byte for byte as on disk.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct NiftiHeader {
    sizeof_hdr: i32,
    data_type: [u8; 10],
    db_name: [u8; 18],
    extents: i32,
    session_error: i16,
    regular: u8,
    dim_info: u8,
    dim: [i16; 8],
    intent_p1: f32,
    intent_p2: f32,
    intent_p3: f32,
    intent_code: i16,
    datatype: i16,
    bitpix: i16,
    slice_start: i16,
    pixdim: [f32; 8],
    vox_offset: f32,
    scl_slope: f32,
    scl_inter: f32,
    slice_end: i16,
    slice_code: u8,
    xyzt_units: u8,
    cal_max: f32,
    cal_min: f32,
    slice_duration: f32,
    toffset: f32,
    glmax: i32,
    glmin: i32,
    descrip: [u8; 80],
    aux_file: [u8; 24],
    qform_code: i16,
    sform_code: i16,
    quatern_b: f32,
    quatern_c: f32,
    quatern_d: f32,
    qoffset_x: f32,
    qoffset_y: f32,
    qoffset_z: f32,
    srow_x: [f32; 4],
    srow_y: [f32; 4],
    srow_z: [f32; 4],
    intent_name: [u8; 16],
    magic: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<NiftiHeader>() == HEADER_SIZE as usize);

/// Voxel types with a NIfTI datatype code.
pub trait NiftiVoxel: Voxel + Pod {
    const DATATYPE: i16;
}

impl NiftiVoxel for u8 {
    const DATATYPE: i16 = 2;
}

impl NiftiVoxel for i16 {
    const DATATYPE: i16 = 4;
}

impl NiftiVoxel for i32 {
    const DATATYPE: i16 = 8;
}

impl NiftiVoxel for f32 {
    const DATATYPE: i16 = 16;
}

impl NiftiVoxel for f64 {
    const DATATYPE: i16 = 64;
}

impl NiftiVoxel for u16 {
    const DATATYPE: i16 = 512;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WriterOptions {
    /// Gzip the whole file (conventionally named `.nii.gz`).
    pub compress: bool,
}

pub struct NiftiWriter {
    options: WriterOptions,
}

impl NiftiWriter {
    pub fn new(options: WriterOptions) -> Self {
        Self { options }
    }

    pub fn write<T: NiftiVoxel>(
        &self,
        volume: &Volume<T>,
        path: impl AsRef<Path>,
    ) -> Result<(), SeriesWriteError> {
        let path = path.as_ref();
        let file = BufWriter::new(File::create(path)?);
        if self.options.compress {
            let mut encoder = GzEncoder::new(file, Compression::default());
            Self::write_to(volume, &mut encoder)?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            Self::write_to(volume, &mut file)?;
            file.flush()?;
        }
        info!("Wrote {:?} volume to {}", volume.size_xyz(), path.display());
        Ok(())
    }

    pub fn write_to<T: NiftiVoxel>(
        volume: &Volume<T>,
        out: &mut impl Write,
    ) -> Result<(), SeriesWriteError> {
        let header = Self::header::<T>(volume)?;
        out.write_all(bytemuck::bytes_of(&header))?;
        out.write_all(&[0u8; 4])?;

        let data = volume.data().as_standard_layout();
        let voxels = data
            .as_slice()
            .ok_or(SeriesWriteError::UnsupportedShape(volume.dim()))?;
        out.write_all(bytemuck::cast_slice(voxels))?;
        Ok(())
    }

    fn header<T: NiftiVoxel>(volume: &Volume<T>) -> Result<NiftiHeader, SeriesWriteError> {
        let (width, height, depth) = volume.size_xyz();
        let to_dim = |n: usize| i16::try_from(n).map_err(|_| SeriesWriteError::UnsupportedShape(volume.dim()));
        let (sx, sy, sz) = volume.spacing();
        let (ox, oy, oz) = volume.origin();

        let mut header = NiftiHeader::zeroed();
        header.sizeof_hdr = HEADER_SIZE;
        header.regular = b'r';
        header.dim = [3, to_dim(width)?, to_dim(height)?, to_dim(depth)?, 1, 1, 1, 1];
        header.datatype = T::DATATYPE;
        header.bitpix = (std::mem::size_of::<T>() * 8) as i16;
        header.pixdim = [1.0, sx, sy, sz, 0.0, 0.0, 0.0, 0.0];
        header.vox_offset = VOX_OFFSET;
        header.scl_slope = 1.0;
        header.xyzt_units = NIFTI_UNITS_MM;

        let description = b"phantom-bmd";
        header.descrip[..description.len()].copy_from_slice(description);

        // DICOM patient space is LPS, NIfTI is RAS: flip x and y
        header.qform_code = NIFTI_XFORM_SCANNER_ANAT;
        header.sform_code = NIFTI_XFORM_SCANNER_ANAT;
        header.quatern_d = 1.0;
        header.qoffset_x = -ox;
        header.qoffset_y = -oy;
        header.qoffset_z = oz;
        header.srow_x = [-sx, 0.0, 0.0, -ox];
        header.srow_y = [0.0, -sy, 0.0, -oy];
        header.srow_z = [0.0, 0.0, sz, oz];
        header.magic = *b"n+1\0";
        Ok(header)
    }
}

/// Save an 8-bit slice image, format chosen by the file extension.
pub fn write_image(image: &GrayImage, path: impl AsRef<Path>) -> Result<(), SeriesWriteError> {
    image.save(path.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use ndarray::Array3;
    use std::io::Read;

    fn sample_volume() -> Volume<i16> {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as i16 - 7);
        Volume::new(data, (0.5, 0.75, 2.0), (-10.0, 20.0, 5.0))
    }

    fn read_i16(bytes: &[u8], offset: usize) -> i16 {
        i16::from_ne_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
    }

    #[test]
    fn header_fields_sit_at_nifti_offsets() {
        let mut bytes = Vec::new();
        NiftiWriter::write_to(&sample_volume(), &mut bytes).expect("in-memory write");

        assert_eq!(bytes.len(), 352 + 24 * 2);
        assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().expect("4 bytes")), 348);
        assert_eq!(read_i16(&bytes, 40), 3);
        assert_eq!((read_i16(&bytes, 42), read_i16(&bytes, 44), read_i16(&bytes, 46)), (4, 3, 2));
        assert_eq!(read_i16(&bytes, 70), 4);
        assert_eq!(read_i16(&bytes, 72), 16);
        assert_eq!(read_f32(&bytes, 80), 0.5);
        assert_eq!(read_f32(&bytes, 88), 2.0);
        assert_eq!(read_f32(&bytes, 108), 352.0);
        assert_eq!(read_f32(&bytes, 268), 10.0);
        assert_eq!(&bytes[344..348], b"n+1\0");
    }

    #[test]
    fn voxels_follow_header_with_x_fastest() {
        let mut bytes = Vec::new();
        NiftiWriter::write_to(&sample_volume(), &mut bytes).expect("in-memory write");
        assert_eq!(read_i16(&bytes, 352), -7);
        assert_eq!(read_i16(&bytes, 354), -6);
        // (x=0, y=1, z=0)
        assert_eq!(read_i16(&bytes, 352 + 4 * 2), 3);
        // (x=3, y=2, z=1)
        assert_eq!(read_i16(&bytes, bytes.len() - 2), 123 - 7);
    }

    #[test]
    fn compressed_file_inflates_to_plain_bytes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let plain_path = dir.path().join("rods.nii");
        let gz_path = dir.path().join("rods.nii.gz");
        let volume = sample_volume();

        NiftiWriter::new(WriterOptions::default())
            .write(&volume, &plain_path)
            .expect("plain write");
        NiftiWriter::new(WriterOptions { compress: true })
            .write(&volume, &gz_path)
            .expect("compressed write");

        let plain = std::fs::read(&plain_path).expect("read plain");
        let mut inflated = Vec::new();
        GzDecoder::new(File::open(&gz_path).expect("open gz"))
            .read_to_end(&mut inflated)
            .expect("inflate");
        assert_eq!(plain, inflated);
    }

    #[test]
    fn unwritable_path_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = NiftiWriter::new(WriterOptions::default())
            .write(&sample_volume(), dir.path().join("missing").join("out.nii"));
        assert!(matches!(result, Err(SeriesWriteError::Io(_))));
    }
}
