use crate::common::*;

/// Unchecked network outputs of a batch.
#[derive(Debug, TensorLike)]
pub struct YolactPredictionUnchecked {
    /// Class logits in shape `[batch, anchors, classes]`.
    pub class_logits: Tensor,
    /// Encoded box offsets in shape `[batch, anchors, 4]`.
    pub box_offsets: Tensor,
    /// Prototype coefficients in shape `[batch, anchors, protos]`.
    pub mask_coefficients: Tensor,
    /// Prototype masks in shape `[batch, proto_height, proto_width, protos]`.
    pub prototypes: Tensor,
    /// Semantic segmentation logits in shape `[batch, seg_height, seg_width, classes]`.
    pub segmentation_logits: Tensor,
}

/// Network outputs of a batch with consistent shapes.
#[derive(Debug, TensorLike, Getters)]
pub struct YolactPrediction {
    #[get = "pub"]
    class_logits: Tensor,
    #[get = "pub"]
    box_offsets: Tensor,
    #[get = "pub"]
    mask_coefficients: Tensor,
    #[get = "pub"]
    prototypes: Tensor,
    #[get = "pub"]
    segmentation_logits: Tensor,
}

impl YolactPrediction {
    pub fn batch_size(&self) -> i64 {
        self.class_logits.size()[0]
    }

    pub fn num_anchors(&self) -> i64 {
        self.class_logits.size()[1]
    }

    pub fn num_classes(&self) -> i64 {
        self.class_logits.size()[2]
    }

    pub fn device(&self) -> Device {
        self.class_logits.device()
    }
}

impl TryFrom<YolactPredictionUnchecked> for YolactPrediction {
    type Error = Error;

    fn try_from(from: YolactPredictionUnchecked) -> Result<Self, Self::Error> {
        let YolactPredictionUnchecked {
            class_logits,
            box_offsets,
            mask_coefficients,
            prototypes,
            segmentation_logits,
        } = from;

        let (batch_size, num_anchors, num_classes) = class_logits
            .size3()
            .context("class_logits must be a [batch, anchors, classes] tensor")?;
        let (box_batch, box_anchors, box_entries) = box_offsets
            .size3()
            .context("box_offsets must be a [batch, anchors, 4] tensor")?;
        let (coef_batch, coef_anchors, num_protos) = mask_coefficients
            .size3()
            .context("mask_coefficients must be a [batch, anchors, protos] tensor")?;
        let (proto_batch, _proto_h, _proto_w, proto_channels) = prototypes
            .size4()
            .context("prototypes must be a [batch, height, width, protos] tensor")?;
        let (seg_batch, _seg_h, _seg_w, seg_channels) = segmentation_logits
            .size4()
            .context("segmentation_logits must be a [batch, height, width, classes] tensor")?;

        ensure!(
            box_entries == 4,
            "box_offsets must have 4 entries per anchor, but get {}",
            box_entries
        );
        ensure!(
            [box_batch, coef_batch, proto_batch, seg_batch]
                .iter()
                .all(|&size| size == batch_size),
            "batch size mismatch among predictions"
        );
        ensure!(
            box_anchors == num_anchors && coef_anchors == num_anchors,
            "anchor count mismatch among predictions"
        );
        ensure!(
            proto_channels == num_protos,
            "prototypes have {} channels but mask_coefficients have {}",
            proto_channels,
            num_protos
        );
        ensure!(
            seg_channels == num_classes,
            "segmentation_logits have {} classes but class_logits have {}",
            seg_channels,
            num_classes
        );
        ensure!(
            hashset! {
                class_logits.device(),
                box_offsets.device(),
                mask_coefficients.device(),
                prototypes.device(),
                segmentation_logits.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );

        Ok(Self {
            class_logits,
            box_offsets,
            mask_coefficients,
            prototypes,
            segmentation_logits,
        })
    }
}

impl From<YolactPrediction> for YolactPredictionUnchecked {
    fn from(from: YolactPrediction) -> Self {
        let YolactPrediction {
            class_logits,
            box_offsets,
            mask_coefficients,
            prototypes,
            segmentation_logits,
        } = from;

        Self {
            class_logits,
            box_offsets,
            mask_coefficients,
            prototypes,
            segmentation_logits,
        }
    }
}

/// Unchecked ground truth of a batch, including the per-anchor assignment.
#[derive(Debug, TensorLike)]
pub struct YolactTargetUnchecked {
    /// Assigned class per anchor in shape `[batch, anchors]`. Background is 0.
    pub class_target: Tensor,
    /// Encoded target offsets in shape `[batch, anchors, 4]`.
    pub box_target: Tensor,
    /// 1 for matched anchors, 0 for negatives. Other values are ignored.
    pub positiveness: Tensor,
    /// Object boxes in `[t, l, b, r]` normalized coordinates in shape `[batch, objects, 4]`.
    pub normalized_box: Tensor,
    /// Binary object masks in shape `[batch, objects, mask_height, mask_width]`.
    pub instance_masks: Tensor,
    /// Index of the matched object per anchor in shape `[batch, anchors]`.
    pub matched_object_index: Tensor,
    /// Class of each object in shape `[batch, objects]`.
    pub object_class: Tensor,
    /// Number of valid objects per image in shape `[batch]`.
    pub object_count: Tensor,
}

/// Ground truth of a batch with consistent shapes and index ranges.
///
/// Integer fields are stored as `Int64` and positiveness as `Float`.
#[derive(Debug, TensorLike, Getters)]
pub struct YolactTarget {
    #[get = "pub"]
    class_target: Tensor,
    #[get = "pub"]
    box_target: Tensor,
    #[get = "pub"]
    positiveness: Tensor,
    #[get = "pub"]
    normalized_box: Tensor,
    #[get = "pub"]
    instance_masks: Tensor,
    #[get = "pub"]
    matched_object_index: Tensor,
    #[get = "pub"]
    object_class: Tensor,
    #[get = "pub"]
    object_count: Tensor,
}

impl YolactTarget {
    pub fn batch_size(&self) -> i64 {
        self.class_target.size()[0]
    }

    pub fn num_anchors(&self) -> i64 {
        self.class_target.size()[1]
    }

    pub fn max_objects(&self) -> i64 {
        self.object_class.size()[1]
    }

    pub fn device(&self) -> Device {
        self.class_target.device()
    }
}

impl TryFrom<YolactTargetUnchecked> for YolactTarget {
    type Error = Error;

    fn try_from(from: YolactTargetUnchecked) -> Result<Self, Self::Error> {
        let YolactTargetUnchecked {
            class_target,
            box_target,
            positiveness,
            normalized_box,
            instance_masks,
            matched_object_index,
            object_class,
            object_count,
        } = from;

        let (batch_size, num_anchors) = class_target
            .size2()
            .context("class_target must be a [batch, anchors] tensor")?;
        let box_target_shape = box_target
            .size3()
            .context("box_target must be a [batch, anchors, 4] tensor")?;
        let positiveness_shape = positiveness
            .size2()
            .context("positiveness must be a [batch, anchors] tensor")?;
        let matched_shape = matched_object_index
            .size2()
            .context("matched_object_index must be a [batch, anchors] tensor")?;
        let (box_batch, max_objects, box_entries) = normalized_box
            .size3()
            .context("normalized_box must be a [batch, objects, 4] tensor")?;
        let (mask_batch, mask_objects, _mask_h, _mask_w) = instance_masks
            .size4()
            .context("instance_masks must be a [batch, objects, height, width] tensor")?;
        let object_class_shape = object_class
            .size2()
            .context("object_class must be a [batch, objects] tensor")?;
        let count_batch = object_count
            .size1()
            .context("object_count must be a [batch] tensor")?;

        ensure!(
            box_target_shape == (batch_size, num_anchors, 4),
            "box_target shape {:?} does not match [{}, {}, 4]",
            box_target.size(),
            batch_size,
            num_anchors
        );
        ensure!(
            positiveness_shape == (batch_size, num_anchors)
                && matched_shape == (batch_size, num_anchors),
            "per-anchor target shapes do not match [{}, {}]",
            batch_size,
            num_anchors
        );
        ensure!(
            box_entries == 4,
            "normalized_box must have 4 entries per object, but get {}",
            box_entries
        );
        ensure!(
            box_batch == batch_size
                && mask_batch == batch_size
                && count_batch == batch_size
                && object_class_shape.0 == batch_size,
            "batch size mismatch among targets"
        );
        ensure!(
            mask_objects == max_objects && object_class_shape.1 == max_objects,
            "object count mismatch among normalized_box, instance_masks and object_class"
        );
        ensure!(
            hashset! {
                class_target.device(),
                box_target.device(),
                positiveness.device(),
                normalized_box.device(),
                instance_masks.device(),
                matched_object_index.device(),
                object_class.device(),
                object_count.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );

        let class_target = class_target.to_kind(Kind::Int64);
        let matched_object_index = matched_object_index.to_kind(Kind::Int64);
        let object_class = object_class.to_kind(Kind::Int64);
        let object_count = object_count.to_kind(Kind::Int64);
        let positiveness = positiveness.to_kind(Kind::Float);

        // object counts within [0, max_objects]
        if batch_size > 0 {
            let min_count = object_count.min().int64_value(&[]);
            let max_count = object_count.max().int64_value(&[]);
            ensure!(
                min_count >= 0 && max_count <= max_objects,
                "object_count must be in range [0, {}], but get values in [{}, {}]",
                max_objects,
                min_count,
                max_count
            );
        }

        // every positive anchor points to a valid object of its image
        {
            let pos_mask = positiveness.eq(POSITIVE);
            let pos_indexes = matched_object_index.masked_select(&pos_mask);
            if !pos_indexes.is_empty() {
                let counts = object_count
                    .reshape(&[batch_size, 1])
                    .expand(&[batch_size, num_anchors], false)
                    .masked_select(&pos_mask);
                let num_invalid = pos_indexes
                    .lt(0i64)
                    .logical_or(&pos_indexes.ge_tensor(&counts))
                    .sum(Kind::Int64)
                    .int64_value(&[]);
                ensure!(
                    num_invalid == 0,
                    "{} positive anchors have matched_object_index out of the object count",
                    num_invalid
                );
            }
        }

        Ok(Self {
            class_target,
            box_target,
            positiveness,
            normalized_box,
            instance_masks,
            matched_object_index,
            object_class,
            object_count,
        })
    }
}

impl From<YolactTarget> for YolactTargetUnchecked {
    fn from(from: YolactTarget) -> Self {
        let YolactTarget {
            class_target,
            box_target,
            positiveness,
            normalized_box,
            instance_masks,
            matched_object_index,
            object_class,
            object_count,
        } = from;

        Self {
            class_target,
            box_target,
            positiveness,
            normalized_box,
            instance_masks,
            matched_object_index,
            object_class,
            object_count,
        }
    }
}

/// Positiveness value of matched anchors.
pub const POSITIVE: f64 = 1.0;
/// Positiveness value of negative anchors.
pub const NEGATIVE: f64 = 0.0;
/// Class index of the background.
pub const BACKGROUND_CLASS: i64 = 0;
