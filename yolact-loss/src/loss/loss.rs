//! Defines the composite loss for training.

use super::{
    classification::{ClassificationLoss, ClassificationLossInit},
    localization::localization_loss,
    mask::{MaskLoss, MaskLossInit},
    misc::{YolactPrediction, YolactTarget},
    segmentation::segmentation_loss,
};
use crate::{common::*, profiling::Timing};

pub use yolact_loss::*;
pub use yolact_loss_output::*;

mod yolact_loss {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct YolactLossInit {
        pub num_classes: usize,
        pub box_weight: Option<f64>,
        pub classification_weight: Option<f64>,
        pub mask_weight: Option<f64>,
        pub segmentation_weight: Option<f64>,
        pub neg_pos_ratio: Option<f64>,
        pub max_masks_for_train: Option<usize>,
    }

    impl YolactLossInit {
        pub fn new(num_classes: usize) -> Self {
            Self {
                num_classes,
                box_weight: None,
                classification_weight: None,
                mask_weight: None,
                segmentation_weight: None,
                neg_pos_ratio: None,
                max_masks_for_train: None,
            }
        }

        pub fn build(self) -> Result<YolactLoss> {
            let Self {
                num_classes,
                box_weight,
                classification_weight,
                mask_weight,
                segmentation_weight,
                neg_pos_ratio,
                max_masks_for_train,
            } = self;

            let box_weight = box_weight.unwrap_or(1.5);
            let classification_weight = classification_weight.unwrap_or(1.0);
            let mask_weight = mask_weight.unwrap_or(6.125);
            let segmentation_weight = segmentation_weight.unwrap_or(1.0);

            ensure!(
                num_classes >= 2,
                "num_classes must count the background and at least one object class"
            );
            ensure!(box_weight >= 0.0, "box_weight must be non-negative");
            ensure!(
                classification_weight >= 0.0,
                "classification_weight must be non-negative"
            );
            ensure!(mask_weight >= 0.0, "mask_weight must be non-negative");
            ensure!(
                segmentation_weight >= 0.0,
                "segmentation_weight must be non-negative"
            );

            let classification = {
                let mut init = ClassificationLossInit::default();
                if let Some(neg_pos_ratio) = neg_pos_ratio {
                    init.neg_pos_ratio = neg_pos_ratio;
                }
                init.build()?
            };

            let mask = {
                let mut init = MaskLossInit::default();
                if let Some(max_masks_for_train) = max_masks_for_train {
                    init.max_masks_for_train = max_masks_for_train;
                }
                init.build()?
            };

            Ok(YolactLoss {
                num_classes: num_classes as i64,
                box_weight,
                classification_weight,
                mask_weight,
                segmentation_weight,
                classification,
                mask,
            })
        }
    }

    #[derive(Debug, Clone)]
    pub struct YolactLoss {
        num_classes: i64,
        box_weight: f64,
        classification_weight: f64,
        mask_weight: f64,
        segmentation_weight: f64,
        classification: ClassificationLoss,
        mask: MaskLoss,
    }

    impl YolactLoss {
        pub fn num_classes(&self) -> i64 {
            self.num_classes
        }

        /// Weights of localization, classification, mask and segmentation losses in order.
        pub fn weights(&self) -> [f64; 4] {
            [
                self.box_weight,
                self.classification_weight,
                self.mask_weight,
                self.segmentation_weight,
            ]
        }

        pub fn forward(
            &self,
            prediction: &YolactPrediction,
            target: &YolactTarget,
        ) -> Result<YolactLossOutput> {
            let mut timing = Timing::new("yolact loss");

            ensure!(
                prediction.batch_size() == target.batch_size(),
                "batch size mismatch: prediction has {} but target has {}",
                prediction.batch_size(),
                target.batch_size()
            );
            ensure!(
                prediction.num_anchors() == target.num_anchors(),
                "anchor count mismatch: prediction has {} but target has {}",
                prediction.num_anchors(),
                target.num_anchors()
            );
            ensure!(
                prediction.num_classes() == self.num_classes,
                "expect {} classes, but the prediction has {}",
                self.num_classes,
                prediction.num_classes()
            );
            ensure!(
                prediction.device() == target.device(),
                "prediction and target are on different devices"
            );

            // localization loss
            let loc_loss = localization_loss(
                prediction.box_offsets(),
                target.box_target(),
                target.positiveness(),
            )?;
            timing.add_event("localization_loss");
            debug_assert!(!bool::from(loc_loss.isnan().any()), "NaN detected");

            // classification loss
            let classification_loss = self.classification.forward(
                prediction.class_logits(),
                target.class_target(),
                target.positiveness(),
            )?;
            timing.add_event("classification_loss");
            debug_assert!(
                !bool::from(classification_loss.isnan().any()),
                "NaN detected"
            );

            // mask loss
            let mask_loss = self.mask.forward(
                prediction.prototypes(),
                prediction.mask_coefficients(),
                target.normalized_box(),
                target.instance_masks(),
                target.positiveness(),
                target.matched_object_index(),
            )?;
            timing.add_event("mask_loss");
            debug_assert!(!bool::from(mask_loss.isnan().any()), "NaN detected");

            // segmentation loss
            let segmentation_loss = segmentation_loss(
                prediction.segmentation_logits(),
                target.instance_masks(),
                target.object_class(),
                target.object_count(),
            )?;
            timing.add_event("segmentation_loss");
            debug_assert!(
                !bool::from(segmentation_loss.isnan().any()),
                "NaN detected"
            );

            let total_loss = self.box_weight * &loc_loss
                + self.classification_weight * &classification_loss
                + self.mask_weight * &mask_loss
                + self.segmentation_weight * &segmentation_loss;
            timing.add_event("sum_losses");

            timing.report();

            Ok(YolactLossOutput {
                total_loss,
                loc_loss,
                classification_loss,
                mask_loss,
                segmentation_loss,
            })
        }
    }
}

mod yolact_loss_output {
    use super::*;

    #[derive(Debug, TensorLike)]
    pub struct YolactLossOutput {
        pub total_loss: Tensor,
        pub loc_loss: Tensor,
        pub classification_loss: Tensor,
        pub mask_loss: Tensor,
        pub segmentation_loss: Tensor,
    }

    /// Detached scalar values of a [YolactLossOutput] for logging.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct YolactLossScalars {
        pub total_loss: f64,
        pub loc_loss: f64,
        pub classification_loss: f64,
        pub mask_loss: f64,
        pub segmentation_loss: f64,
    }

    impl YolactLossOutput {
        pub fn scalars(&self) -> YolactLossScalars {
            YolactLossScalars {
                total_loss: self.total_loss.double_value(&[]),
                loc_loss: self.loc_loss.double_value(&[]),
                classification_loss: self.classification_loss.double_value(&[]),
                mask_loss: self.mask_loss.double_value(&[]),
                segmentation_loss: self.segmentation_loss.double_value(&[]),
            }
        }

        pub fn weighted_mean<L>(iter: impl IntoIterator<Item = (L, f64)>) -> Result<Self>
        where
            L: Borrow<YolactLossOutput>,
        {
            let (
                total_loss_vec,
                loc_loss_vec,
                classification_loss_vec,
                mask_loss_vec,
                segmentation_loss_vec,
                weight_vec,
            ) = iter
                .into_iter()
                .map(|(loss, weight)| {
                    let YolactLossOutput {
                        total_loss,
                        loc_loss,
                        classification_loss,
                        mask_loss,
                        segmentation_loss,
                    } = loss.borrow().shallow_clone();

                    (
                        total_loss,
                        loc_loss,
                        classification_loss,
                        mask_loss,
                        segmentation_loss,
                        weight,
                    )
                })
                .unzip_n_vec();

            let weight_iter = weight_vec.iter().cloned();

            let total_loss = Tensor::f_weighted_mean_tensors(
                total_loss_vec.into_iter().zip(weight_iter.clone()),
            )?;
            let loc_loss =
                Tensor::f_weighted_mean_tensors(loc_loss_vec.into_iter().zip(weight_iter.clone()))?;
            let classification_loss = Tensor::f_weighted_mean_tensors(
                classification_loss_vec.into_iter().zip(weight_iter.clone()),
            )?;
            let mask_loss =
                Tensor::f_weighted_mean_tensors(mask_loss_vec.into_iter().zip(weight_iter.clone()))?;
            let segmentation_loss = Tensor::f_weighted_mean_tensors(
                segmentation_loss_vec.into_iter().zip(weight_iter),
            )?;

            Ok(YolactLossOutput {
                total_loss,
                loc_loss,
                classification_loss,
                mask_loss,
                segmentation_loss,
            })
        }
    }
}
