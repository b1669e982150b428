//! Loss configuration format.

use crate::{common::*, loss::YolactLossInit};

/// The loss function configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The number of classes including the background.
    pub num_classes: usize,
    /// The weight factor of localization loss.
    pub box_weight: Option<R64>,
    /// The weight factor of classification loss.
    pub classification_weight: Option<R64>,
    /// The weight factor of mask loss.
    pub mask_weight: Option<R64>,
    /// The weight factor of semantic segmentation loss.
    pub segmentation_weight: Option<R64>,
    /// The number of hard negatives mined per positive anchor.
    pub neg_pos_ratio: Option<R64>,
    /// The maximum number of positive anchors per image in mask loss.
    pub max_masks_for_train: Option<usize>,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    pub fn yolact_loss_init(&self) -> YolactLossInit {
        let Self {
            num_classes,
            box_weight,
            classification_weight,
            mask_weight,
            segmentation_weight,
            neg_pos_ratio,
            max_masks_for_train,
        } = *self;

        [
            ("box_weight", box_weight),
            ("classification_weight", classification_weight),
            ("mask_weight", mask_weight),
            ("segmentation_weight", segmentation_weight),
        ]
        .into_iter()
        .filter(|(_, weight)| *weight == Some(r64(0.0)))
        .for_each(|(name, _)| {
            warn!("{} is zero, the corresponding loss is disabled", name);
        });

        YolactLossInit {
            num_classes,
            box_weight: box_weight.map(R64::raw),
            classification_weight: classification_weight.map(R64::raw),
            mask_weight: mask_weight.map(R64::raw),
            segmentation_weight: segmentation_weight.map(R64::raw),
            neg_pos_ratio: neg_pos_ratio.map(R64::raw),
            max_masks_for_train,
        }
    }
}
