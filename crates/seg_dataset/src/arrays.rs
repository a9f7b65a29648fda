//! Preprocessed numpy splits held in memory.

use crate::types::{DatasetResult, SegDatasetError};
use data_contracts::{HostBatch, Split, NUM_CLASSES, NUM_MODALITIES};
use ndarray::{s, Array3, Array4, ArrayD, Axis, Ix3, Ix4};
use ndarray_npy::{read_npy, ReadNpyExt};
use std::path::Path;

pub const IMAGES_FILE: &str = "images.npy";
pub const LABELS_FILE: &str = "labels.npy";
pub const MASK_FILE: &str = "mask.npy";

/// One split of the dataset.
///
/// Layout on disk is channels-last, as written by numpy:
/// images `f32 [N, H, W, 4]`; labels `u8`, either class indices `[N, H, W]`
/// or one-hot channels `[N, H, W, 5]`; mask `u8`, either `[N, H, W]` or
/// `[N, H, W, 1]` (1 = foreground). Labels are held as class indices and only
/// expanded to one-hot channels-first form by [`SplitArrays::assemble`].
#[derive(Debug, Clone)]
pub struct SplitArrays {
    split: Split,
    images: Array4<f32>,
    labels: Array3<u8>,
    mask: Array3<u8>,
}

fn read_array<T: ReadNpyExt>(path: &Path) -> DatasetResult<T> {
    read_npy(path).map_err(|e| SegDatasetError::Npy {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Class-index labels from either `[N, H, W]` or one-hot `[N, H, W, C]`.
fn class_indices(split: Split, labels: ArrayD<u8>) -> DatasetResult<Array3<u8>> {
    let shape = labels.shape().to_vec();
    let shape_err = || SegDatasetError::Shape {
        split,
        msg: format!("labels shape {shape:?} is neither [N, H, W] nor [N, H, W, {NUM_CLASSES}]"),
    };
    match shape.len() {
        3 => labels.into_dimensionality::<Ix3>().map_err(|_| shape_err()),
        4 if shape[3] == NUM_CLASSES => {
            let one_hot = labels.into_dimensionality::<Ix4>().map_err(|_| shape_err())?;
            let (n, h, w, _) = one_hot.dim();
            let mut out = Array3::<u8>::zeros((n, h, w));
            for ((i, y, x), slot) in out.indexed_iter_mut() {
                let lane = one_hot.slice(s![i, y, x, ..]);
                let mut hot = lane.iter().enumerate().filter(|&(_, &v)| v != 0);
                match (hot.next(), hot.next()) {
                    (Some((class, &1)), None) => *slot = class as u8,
                    _ => {
                        return Err(SegDatasetError::Value {
                            split,
                            msg: format!("label at [{i}, {y}, {x}] is not one-hot: {lane}"),
                        })
                    }
                }
            }
            Ok(out)
        }
        _ => Err(shape_err()),
    }
}

/// Mask from either `[N, H, W]` or `[N, H, W, 1]`.
fn single_channel(split: Split, mask: ArrayD<u8>) -> DatasetResult<Array3<u8>> {
    let shape = mask.shape().to_vec();
    let shape_err = || SegDatasetError::Shape {
        split,
        msg: format!("mask shape {shape:?} is neither [N, H, W] nor [N, H, W, 1]"),
    };
    match shape.len() {
        3 => mask.into_dimensionality::<Ix3>().map_err(|_| shape_err()),
        4 if shape[3] == 1 => Ok(mask
            .into_dimensionality::<Ix4>()
            .map_err(|_| shape_err())?
            .index_axis_move(Axis(3), 0)),
        _ => Err(shape_err()),
    }
}

impl SplitArrays {
    pub fn load(root: &Path, split: Split) -> DatasetResult<Self> {
        let dir = root.join(split.as_str());
        if !dir.is_dir() {
            return Err(SegDatasetError::MissingSplit { path: dir });
        }
        let images: Array4<f32> = read_array(&dir.join(IMAGES_FILE))?;
        let labels = class_indices(split, read_array(&dir.join(LABELS_FILE))?)?;
        let mask = single_channel(split, read_array(&dir.join(MASK_FILE))?)?;
        Self::from_arrays(split, images, labels, mask)
    }

    pub fn from_arrays(
        split: Split,
        images: Array4<f32>,
        labels: Array3<u8>,
        mask: Array3<u8>,
    ) -> DatasetResult<Self> {
        let (n, h, w, c) = images.dim();
        let shape_err = |msg: String| SegDatasetError::Shape { split, msg };
        if n == 0 || h == 0 || w == 0 {
            return Err(shape_err(format!("images are empty: {:?}", images.shape())));
        }
        if c != NUM_MODALITIES {
            return Err(shape_err(format!(
                "images have {c} channels, expected {NUM_MODALITIES}"
            )));
        }
        if labels.dim() != (n, h, w) {
            return Err(shape_err(format!(
                "labels shape {:?} does not match images [{n}, {h}, {w}]",
                labels.shape()
            )));
        }
        if mask.dim() != (n, h, w) {
            return Err(shape_err(format!(
                "mask shape {:?} does not match images [{n}, {h}, {w}]",
                mask.shape()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&v| v as usize >= NUM_CLASSES) {
            return Err(SegDatasetError::Value {
                split,
                msg: format!("label {bad} outside 0..{NUM_CLASSES}"),
            });
        }
        if let Some(bad) = mask.iter().find(|&&v| v > 1) {
            return Err(SegDatasetError::Value {
                split,
                msg: format!("mask value {bad} is not binary"),
            });
        }
        Ok(Self {
            split,
            images,
            labels,
            mask,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (height, width)
    pub fn spatial(&self) -> (usize, usize) {
        (self.images.shape()[1], self.images.shape()[2])
    }

    /// Gather `indices` into a channels-first batch with one-hot labels.
    pub fn assemble(&self, indices: &[usize]) -> DatasetResult<HostBatch> {
        let (h, w) = self.spatial();
        let plane = h * w;
        let mut batch = HostBatch::zeros(indices.len(), h, w);
        for (b, &idx) in indices.iter().enumerate() {
            if idx >= self.len() {
                return Err(SegDatasetError::Index {
                    index: idx,
                    len: self.len(),
                });
            }
            let image = self.images.index_axis(Axis(0), idx);
            let labels = self.labels.index_axis(Axis(0), idx);
            let mask = self.mask.index_axis(Axis(0), idx);
            for ((y, x, c), value) in image.indexed_iter() {
                batch.images[(b * NUM_MODALITIES + c) * plane + y * w + x] = *value;
            }
            for ((y, x), class) in labels.indexed_iter() {
                batch.labels[(b * NUM_CLASSES + *class as usize) * plane + y * w + x] = 1.0;
            }
            for ((y, x), value) in mask.indexed_iter() {
                batch.mask[b * plane + y * w + x] = f32::from(*value);
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_split() -> SplitArrays {
        let images = Array4::from_shape_fn((2, 2, 3, NUM_MODALITIES), |(n, y, x, c)| {
            (n * 1000 + c * 100 + y * 10 + x) as f32
        });
        let labels = Array3::from_shape_fn((2, 2, 3), |(n, y, x)| ((n + y + x) % NUM_CLASSES) as u8);
        let mask = Array3::from_shape_fn((2, 2, 3), |(_, y, _)| y as u8);
        SplitArrays::from_arrays(Split::Train, images, labels, mask).unwrap()
    }

    #[test]
    fn assemble_transposes_to_channels_first() {
        let split = tiny_split();
        let batch = split.assemble(&[1]).unwrap();
        assert_eq!(batch.image_dims(), [1, NUM_MODALITIES, 2, 3]);
        // sample 1, channel 2, y=1, x=2
        assert_eq!(batch.images[2 * 6 + 3 + 2], 1000.0 + 200.0 + 10.0 + 2.0);
        assert!(batch.validate_values().is_ok());
    }

    #[test]
    fn assemble_one_hot_encodes_labels() {
        let split = tiny_split();
        let batch = split.assemble(&[0]).unwrap();
        // voxel (y=0, x=2) has class 2
        assert_eq!(batch.labels[2 * 6 + 2], 1.0);
        assert_eq!(batch.labels[2], 0.0);
        assert_eq!(batch.mask, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let split = tiny_split();
        assert!(matches!(
            split.assemble(&[0, 5]),
            Err(SegDatasetError::Index { index: 5, len: 2 })
        ));
    }

    #[test]
    fn label_outside_class_range_is_rejected() {
        let images = Array4::<f32>::zeros((1, 2, 2, NUM_MODALITIES));
        let mut labels = Array3::<u8>::zeros((1, 2, 2));
        labels[[0, 1, 1]] = NUM_CLASSES as u8;
        let mask = Array3::<u8>::ones((1, 2, 2));
        let err = SplitArrays::from_arrays(Split::Valid, images, labels, mask).unwrap_err();
        assert!(matches!(err, SegDatasetError::Value { split: Split::Valid, .. }));
    }

    #[test]
    fn channel_mask_is_squeezed_and_wide_mask_rejected() {
        let mask = Array4::<u8>::ones((1, 2, 2, 1)).into_dyn();
        assert_eq!(single_channel(Split::Train, mask).unwrap().dim(), (1, 2, 2));
        let wide = Array4::<u8>::ones((1, 2, 2, 2)).into_dyn();
        assert!(matches!(
            single_channel(Split::Train, wide),
            Err(SegDatasetError::Shape { .. })
        ));
    }

    #[test]
    fn one_hot_labels_become_class_indices() {
        let mut one_hot = Array4::<u8>::zeros((1, 1, 2, NUM_CLASSES));
        one_hot[[0, 0, 0, 3]] = 1;
        one_hot[[0, 0, 1, 0]] = 1;
        let labels = class_indices(Split::Valid, one_hot.into_dyn()).unwrap();
        assert_eq!(labels.into_raw_vec_and_offset().0, vec![3, 0]);
    }

    #[test]
    fn mismatched_mask_shape_is_rejected() {
        let images = Array4::<f32>::zeros((2, 2, 2, NUM_MODALITIES));
        let labels = Array3::<u8>::zeros((2, 2, 2));
        let mask = Array3::<u8>::zeros((1, 2, 2));
        assert!(matches!(
            SplitArrays::from_arrays(Split::Train, images, labels, mask),
            Err(SegDatasetError::Shape { .. })
        ));
    }
}
