use super::misc::POSITIVE;
use crate::common::*;
use rand::seq::index;
use tch_goodies::utils::EPSILON;

#[derive(Debug, Clone)]
pub struct MaskLossInit {
    /// The maximum number of positive anchors per image used for the mask loss.
    pub max_masks_for_train: usize,
}

impl MaskLossInit {
    pub fn build(self) -> Result<MaskLoss> {
        let Self {
            max_masks_for_train,
        } = self;
        ensure!(
            max_masks_for_train >= 1,
            "max_masks_for_train must be at least 1"
        );
        Ok(MaskLoss {
            max_masks_for_train,
        })
    }
}

impl Default for MaskLossInit {
    fn default() -> Self {
        Self {
            max_masks_for_train: 100,
        }
    }
}

/// Prototype mask assembly loss.
///
/// Each positive anchor combines the prototypes of its image into a mask
/// logit map. The map is compared against the mask of the matched object by
/// sigmoid cross-entropy, cropped to the object box and normalized by the box
/// area. The sum over positives is divided by the number of positives used.
#[derive(Debug, Clone)]
pub struct MaskLoss {
    max_masks_for_train: usize,
}

impl MaskLoss {
    pub fn max_masks_for_train(&self) -> usize {
        self.max_masks_for_train
    }

    /// Compute the loss.
    ///
    /// - `prototypes`: `[batch, proto_height, proto_width, protos]`
    /// - `mask_coefficients`: `[batch, anchors, protos]`
    /// - `normalized_box`: `[batch, objects, 4]` in TLBR normalized coordinates
    /// - `instance_masks`: `[batch, objects, mask_height, mask_width]`
    /// - `positiveness`, `matched_object_index`: `[batch, anchors]`
    pub fn forward(
        &self,
        prototypes: &Tensor,
        mask_coefficients: &Tensor,
        normalized_box: &Tensor,
        instance_masks: &Tensor,
        positiveness: &Tensor,
        matched_object_index: &Tensor,
    ) -> Result<Tensor> {
        let (batch_size, proto_h, proto_w, num_protos) = prototypes.size4()?;
        let (_, _, coef_protos) = mask_coefficients.size3()?;
        ensure!(
            coef_protos == num_protos,
            "prototypes and mask_coefficients disagree on the number of prototypes"
        );
        let device = prototypes.device();

        let (losses, counts): (Vec<_>, Vec<_>) = (0..batch_size)
            .map(|batch_index| -> Result<_> {
                let pos_indexes = positiveness
                    .f_select(0, batch_index)?
                    .eq(POSITIVE)
                    .nonzero()
                    .f_view([-1])?;
                let pos_indexes = self.limit_positives(&pos_indexes)?;
                let num_positives = pos_indexes.size1()?;

                if num_positives == 0 {
                    return Ok(None);
                }

                // assemble mask logits in shape [positives, height, width]
                let coefs = mask_coefficients
                    .f_select(0, batch_index)?
                    .f_index_select(0, &pos_indexes)?;
                let pred_masks = prototypes
                    .f_select(0, batch_index)?
                    .f_matmul(&coefs.tr())?
                    .f_permute(&[2, 0, 1])?;

                let object_indexes = matched_object_index
                    .f_select(0, batch_index)?
                    .to_kind(Kind::Int64)
                    .f_index_select(0, &pos_indexes)?;

                let gt_masks = {
                    let masks = instance_masks.f_select(0, batch_index)?;
                    let (_, mask_h, mask_w) = masks.size3()?;
                    let masks = if (mask_h, mask_w) == (proto_h, proto_w) {
                        masks.to_kind(Kind::Float)
                    } else {
                        masks.f_resize_masks(proto_h, proto_w)?
                    };
                    masks
                        .f_index_select(0, &object_indexes)?
                        .to_kind(pred_masks.kind())
                        .detach()
                };

                let boxes = TLBRTensor::try_from(&normalized_box.f_select(0, batch_index)?)?
                    .index_select(&object_indexes);
                let areas = boxes.area();
                // degenerate boxes add nothing
                let valid = areas
                    .area()
                    .f_view([-1])?
                    .f_gt(EPSILON)?
                    .to_kind(pred_masks.kind());
                let areas = areas.clamp_min_flat(EPSILON);

                let loss = pred_masks
                    .f_binary_cross_entropy_with_logits::<Tensor>(
                        &gt_masks,
                        None,
                        None,
                        Reduction::None,
                    )?
                    .f_crop_by_boxes(&boxes)?
                    .f_sum_dim_intlist(&[1, 2], false, Kind::Float)?
                    .f_div(&areas)?
                    .f_mul(&valid)?
                    .f_sum(Kind::Float)?;

                Ok(Some((loss, num_positives)))
            })
            .filter_map(|result| result.transpose())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();

        let num_positives: i64 = counts.iter().sum();
        if num_positives == 0 {
            debug!("no positive anchors in batch, mask loss is zero");
            return Ok(Tensor::zeros(&[], (Kind::Float, device)));
        }

        let loss = Tensor::f_sum_tensors(&losses)? / num_positives as f64;
        Ok(loss)
    }

    /// Keep at most `max_masks_for_train` positive indexes, sampled uniformly.
    fn limit_positives(&self, pos_indexes: &Tensor) -> Result<Tensor> {
        let num_positives = pos_indexes.size1()? as usize;
        if num_positives <= self.max_masks_for_train {
            return Ok(pos_indexes.shallow_clone());
        }

        debug!(
            "subsample {} out of {} positive anchors for mask loss",
            self.max_masks_for_train, num_positives
        );

        let picks: Vec<i64> = index::sample(
            &mut rand::thread_rng(),
            num_positives,
            self.max_masks_for_train,
        )
        .into_iter()
        .sorted()
        .map(|pick| pick as i64)
        .collect();
        let picks = Tensor::of_slice(&picks).to_device(pos_indexes.device());
        Ok(pos_indexes.f_index_select(0, &picks)?)
    }
}
