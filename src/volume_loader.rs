use crate::{enums::SortBy, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, OpenFileOptions, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::{debug, info, warn};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesReadError {
    #[error("No DICOM series in {0}")]
    NoSeries(PathBuf),

    #[error("Series {0} is not present in the directory")]
    UnknownSeries(String),

    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Decoded slice with the attributes needed to order and place it
struct SliceImage {
    order: Option<f32>,
    position: Option<(f32, f32, f32)>,
    pixels: Array2<i16>,
}

pub struct SeriesReader;

/// DICOM files of a directory grouped by Series Instance UID.
#[derive(Debug, Clone)]
pub struct SeriesCatalog {
    directory: PathBuf,
    series: BTreeMap<String, Vec<PathBuf>>,
}

impl SeriesReader {
    /// Group every DICOM file in `directory` by series.
    ///
    /// Only headers are read. Files that fail to parse as DICOM are skipped.
    ///
    /// # Errors
    ///
    /// [`SeriesReadError::NoSeries`] if no file carries a Series Instance UID.
    pub fn scan(directory: impl AsRef<Path>) -> Result<SeriesCatalog, SeriesReadError> {
        let directory = directory.as_ref();
        let paths: Vec<PathBuf> = fs::read_dir(directory)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        let tagged: Vec<(String, PathBuf)> = paths
            .into_par_iter()
            .filter_map(|path| {
                let uid = Self::series_uid(&path)?;
                Some((uid, path))
            })
            .collect();

        let mut series: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for (uid, path) in tagged {
            series.entry(uid).or_default().push(path);
        }
        if series.is_empty() {
            return Err(SeriesReadError::NoSeries(directory.to_path_buf()));
        }
        for files in series.values_mut() {
            files.sort();
        }

        debug!("{} series in {}", series.len(), directory.display());
        Ok(SeriesCatalog {
            directory: directory.to_path_buf(),
            series,
        })
    }

    fn series_uid(path: &Path) -> Option<String> {
        let header = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .ok()?;
        let uid = header
            .element(tags::SERIES_INSTANCE_UID)
            .ok()?
            .to_str()
            .ok()?;
        let uid = uid.trim_end_matches(['\0', ' ']);
        (!uid.is_empty()).then(|| uid.to_string())
    }
}

impl SeriesCatalog {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Series identifiers in lexical order.
    pub fn series_uids(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }

    pub fn file_count(&self, uid: &str) -> Option<usize> {
        self.series.get(uid).map(Vec::len)
    }

    pub fn first_uid(&self) -> Option<&str> {
        self.series.keys().next().map(String::as_str)
    }

    /// Read one series into a volume of signed (Hounsfield) values.
    pub fn load(&self, uid: &str, sort_by: SortBy) -> Result<Volume<i16>, SeriesReadError> {
        let paths = self
            .series
            .get(uid)
            .ok_or_else(|| SeriesReadError::UnknownSeries(uid.to_string()))?;
        info!("Reading series {uid} ({} files)", paths.len());
        VolumeLoader::load_from_file_paths(paths, sort_by)
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume<i16>, SeriesReadError> {
        let mut slices: Vec<SliceImage> = dicom_objects
            .par_iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, &sort_by))
            .collect();

        if slices.is_empty() {
            return Err(SeriesReadError::NoValidImages);
        }
        if slices.len() < dicom_objects.len() {
            warn!(
                "{} of {} files had no decodable image",
                dicom_objects.len() - slices.len(),
                dicom_objects.len()
            );
        }

        Self::sort_slices(&mut slices, sort_by);
        Self::validate_dimensions(&slices)?;

        let spacing = Self::get_spacing(dicom_objects).ok_or(SeriesReadError::MissingSpacing)?;
        Ok(Self::assemble(&slices, spacing))
    }

    // Slice 0 sits at the origin; slice k at origin z + k * spacing z
    fn assemble(slices: &[SliceImage], spacing: (f32, f32, f32)) -> Volume<i16> {
        let origin = slices[0].position.unwrap_or_default();
        Volume::new(Self::build_volume_array(slices), spacing, origin)
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<Volume<i16>, SeriesReadError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume<i16>, SeriesReadError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(SeriesReadError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<SliceImage> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let pixels = Self::decode_image(dicom_object)?;
        Some(SliceImage {
            order,
            position: Self::get_position(dicom_object),
            pixels,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn get_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<(f32, f32, f32)> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?;
        match pos.as_slice() {
            [x, y, z, ..] => Some((*x, *y, *z)),
            _ => None,
        }
    }

    // Stored values pass through the modality LUT (rescale slope/intercept) so CT
    // slices come out in Hounsfield units
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<i16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<i16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    /// Ascending order, so the voxel z index grows with the patient z position.
    fn sort_slices(slices: &mut [SliceImage], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(slices: &[SliceImage]) -> Result<(), SeriesReadError> {
        let first_dim = slices[0].pixels.dim();
        if slices.iter().any(|slice| slice.pixels.dim() != first_dim) {
            return Err(SeriesReadError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[SliceImage]) -> Array3<i16> {
        let (height, width) = slices[0].pixels.dim();
        let depth = slices.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.pixels);
        }

        volume
    }

    /// Spacing in (x, y, z) order. Pixel Spacing holds (row, column) spacing, i.e. y
    /// first.
    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_spacing = dicom_object
                .element(tags::SPACING_BETWEEN_SLICES)
                .ok()
                .and_then(|e| e.to_float32().ok())
                .or_else(|| {
                    dicom_object
                        .element(tags::SLICE_THICKNESS)
                        .ok()?
                        .to_float32()
                        .ok()
                })?;

            match pixel_spacing.as_slice() {
                [row, column, ..] => Some((*column, *row, slice_spacing)),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_has_no_series() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("notes.txt"), b"not a dicom file").expect("write");
        let result = SeriesReader::scan(dir.path());
        assert!(matches!(result, Err(SeriesReadError::NoSeries(_))));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = SeriesReader::scan(dir.path().join("absent"));
        assert!(matches!(result, Err(SeriesReadError::Io(_))));
    }

    #[test]
    fn directory_without_dcm_files_has_no_images() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = VolumeLoader::load_from_directory(dir.path(), SortBy::default());
        assert!(matches!(result, Err(SeriesReadError::NoValidImages)));
    }

    fn slices_at(positions: &[f32]) -> Vec<SliceImage> {
        positions
            .iter()
            .map(|&z| SliceImage {
                order: Some(z),
                position: Some((-20.0, 35.0, z)),
                pixels: Array2::from_elem((2, 2), z as i16),
            })
            .collect()
    }

    #[test]
    fn slices_stack_by_ascending_position() {
        let mut slices = slices_at(&[2.0, -1.0, 5.0]);
        VolumeLoader::sort_slices(&mut slices, SortBy::ImagePositionPatient);
        let order: Vec<_> = slices.iter().map(|s| s.order).collect();
        assert_eq!(order, vec![Some(-1.0), Some(2.0), Some(5.0)]);

        let volume = VolumeLoader::build_volume_array(&slices);
        assert_eq!(volume[[2, 1, 1]], 5);
    }

    #[test]
    fn cropped_series_keeps_patient_z_geometry() {
        let mut slices = slices_at(&[4.0, 0.0, 7.0, 2.0, 8.0, 1.0, 6.0, 3.0, 5.0]);
        VolumeLoader::sort_slices(&mut slices, SortBy::ImagePositionPatient);
        let volume = VolumeLoader::assemble(&slices, (0.5, 0.5, 1.0));
        assert_eq!(volume.origin(), (-20.0, 35.0, 0.0));

        let cropped = volume
            .crop(&crate::Region::new([0, 0, 2], [2, 2, 3]))
            .expect("region fits");
        // Index 0 of the crop holds the slice at z = 2 mm
        assert_eq!(cropped.data()[[0, 0, 0]], 2);
        assert_eq!(cropped.origin().2, 2.0);

        let mut bytes = Vec::new();
        crate::NiftiWriter::write_to(&cropped, &mut bytes).expect("in-memory write");
        let f32_at = |offset: usize| {
            f32::from_ne_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
        };
        // qoffset_z, then srow_z
        assert_eq!(f32_at(276), 2.0);
        let srow_z: Vec<f32> = (0..4).map(|i| f32_at(312 + 4 * i)).collect();
        assert_eq!(srow_z, vec![0.0, 0.0, 1.0, 2.0]);
    }
}
