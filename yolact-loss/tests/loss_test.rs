use anyhow::Result;
use approx::assert_abs_diff_eq;
use std::convert::TryFrom;
use tch::{Device, Kind, Tensor};
use yolact_loss::loss::{
    YolactLoss, YolactLossInit, YolactPrediction, YolactPredictionUnchecked, YolactTarget,
    YolactTargetUnchecked,
};

const BATCH_SIZE: i64 = 2;
const NUM_ANCHORS: i64 = 6;
const NUM_CLASSES: i64 = 3;
const NUM_PROTOS: i64 = 4;
const PROTO_SIZE: i64 = 8;
const SEG_SIZE: i64 = 4;
const MASK_SIZE: i64 = 16;
const MAX_OBJECTS: i64 = 2;

/// Boxes of each image in TLBR normalized coordinates.
const BOXES: [[[f32; 4]; 2]; 2] = [
    [[0.0, 0.0, 0.5, 0.5], [0.25, 0.25, 1.0, 1.0]],
    [[0.125, 0.25, 0.875, 0.75], [0.0, 0.0, 0.0, 0.0]],
];

fn loss_fn() -> Result<YolactLoss> {
    YolactLossInit::new(NUM_CLASSES as usize).build()
}

fn prediction(seed: i64) -> YolactPredictionUnchecked {
    tch::manual_seed(seed);
    let opts = (Kind::Float, Device::Cpu);

    YolactPredictionUnchecked {
        class_logits: Tensor::randn(&[BATCH_SIZE, NUM_ANCHORS, NUM_CLASSES], opts),
        box_offsets: Tensor::randn(&[BATCH_SIZE, NUM_ANCHORS, 4], opts),
        mask_coefficients: Tensor::randn(&[BATCH_SIZE, NUM_ANCHORS, NUM_PROTOS], opts),
        prototypes: Tensor::randn(&[BATCH_SIZE, PROTO_SIZE, PROTO_SIZE, NUM_PROTOS], opts),
        segmentation_logits: Tensor::randn(&[BATCH_SIZE, SEG_SIZE, SEG_SIZE, NUM_CLASSES], opts),
    }
}

fn target(seed: i64) -> YolactTargetUnchecked {
    tch::manual_seed(seed);
    let opts = (Kind::Float, Device::Cpu);

    let normalized_box = Tensor::of_slice(&BOXES.concat().concat()).view([BATCH_SIZE, MAX_OBJECTS, 4]);

    // rasterize each box into its mask
    let instance_masks = Tensor::zeros(&[BATCH_SIZE, MAX_OBJECTS, MASK_SIZE, MASK_SIZE], opts);
    BOXES.iter().enumerate().for_each(|(batch_index, boxes)| {
        boxes.iter().enumerate().for_each(|(object_index, &[t, l, b, r])| {
            let scale = MASK_SIZE as f32;
            let (top, left) = ((t * scale) as i64, (l * scale) as i64);
            let (bottom, right) = ((b * scale) as i64, (r * scale) as i64);
            if bottom > top && right > left {
                let _ = instance_masks
                    .get(batch_index as i64)
                    .get(object_index as i64)
                    .narrow(0, top, bottom - top)
                    .narrow(1, left, right - left)
                    .fill_(1.0);
            }
        });
    });

    YolactTargetUnchecked {
        class_target: Tensor::of_slice(&[1i64, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 0])
            .view([BATCH_SIZE, NUM_ANCHORS]),
        box_target: Tensor::randn(&[BATCH_SIZE, NUM_ANCHORS, 4], opts),
        positiveness: Tensor::of_slice(&[1i64, 0, 0, 1, -1, 0, 0, 1, 0, 0, 0, 0])
            .view([BATCH_SIZE, NUM_ANCHORS]),
        normalized_box,
        instance_masks,
        matched_object_index: Tensor::of_slice(&[0i64, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0])
            .view([BATCH_SIZE, NUM_ANCHORS]),
        object_class: Tensor::of_slice(&[1i64, 2, 2, 0]).view([BATCH_SIZE, MAX_OBJECTS]),
        object_count: Tensor::of_slice(&[2i64, 1]),
    }
}

fn scalar(tensor: &Tensor) -> f64 {
    tensor.double_value(&[])
}

#[test]
fn total_is_weighted_sum() -> Result<()> {
    let _ = pretty_env_logger::try_init();

    let loss_fn = loss_fn()?;
    let prediction = YolactPrediction::try_from(prediction(1))?;
    let target = YolactTarget::try_from(target(2))?;
    let output = loss_fn.forward(&prediction, &target)?;

    let [box_weight, classification_weight, mask_weight, segmentation_weight] = loss_fn.weights();
    let expect = box_weight * scalar(&output.loc_loss)
        + classification_weight * scalar(&output.classification_loss)
        + mask_weight * scalar(&output.mask_loss)
        + segmentation_weight * scalar(&output.segmentation_loss);
    assert_abs_diff_eq!(scalar(&output.total_loss), expect, epsilon = 1e-4);

    let scalars = output.scalars();
    assert!(scalars.loc_loss > 0.0);
    assert!(scalars.classification_loss > 0.0);
    assert!(scalars.mask_loss > 0.0);
    assert!(scalars.segmentation_loss > 0.0);
    assert!(scalars.total_loss.is_finite());
    Ok(())
}

#[test]
fn anchor_permutation_invariance() -> Result<()> {
    let loss_fn = loss_fn()?;
    let output = loss_fn.forward(
        &YolactPrediction::try_from(prediction(3))?,
        &YolactTarget::try_from(target(4))?,
    )?;

    let perm = Tensor::of_slice(&[5i64, 3, 1, 0, 2, 4]);
    let permuted_output = {
        let YolactPredictionUnchecked {
            class_logits,
            box_offsets,
            mask_coefficients,
            prototypes,
            segmentation_logits,
        } = prediction(3);
        let YolactTargetUnchecked {
            class_target,
            box_target,
            positiveness,
            matched_object_index,
            normalized_box,
            instance_masks,
            object_class,
            object_count,
        } = target(4);

        let prediction = YolactPredictionUnchecked {
            class_logits: class_logits.index_select(1, &perm),
            box_offsets: box_offsets.index_select(1, &perm),
            mask_coefficients: mask_coefficients.index_select(1, &perm),
            prototypes,
            segmentation_logits,
        };
        let target = YolactTargetUnchecked {
            class_target: class_target.index_select(1, &perm),
            box_target: box_target.index_select(1, &perm),
            positiveness: positiveness.index_select(1, &perm),
            matched_object_index: matched_object_index.index_select(1, &perm),
            normalized_box,
            instance_masks,
            object_class,
            object_count,
        };

        loss_fn.forward(
            &YolactPrediction::try_from(prediction)?,
            &YolactTarget::try_from(target)?,
        )?
    };

    let lhs = output.scalars();
    let rhs = permuted_output.scalars();
    assert_abs_diff_eq!(lhs.loc_loss, rhs.loc_loss, epsilon = 1e-5);
    assert_abs_diff_eq!(lhs.classification_loss, rhs.classification_loss, epsilon = 1e-5);
    assert_abs_diff_eq!(lhs.mask_loss, rhs.mask_loss, epsilon = 1e-4);
    assert_abs_diff_eq!(lhs.segmentation_loss, rhs.segmentation_loss, epsilon = 1e-5);
    assert_abs_diff_eq!(lhs.total_loss, rhs.total_loss, epsilon = 1e-4);
    Ok(())
}

#[test]
fn batch_without_positives() -> Result<()> {
    let loss_fn = loss_fn()?;
    let target = YolactTargetUnchecked {
        positiveness: Tensor::zeros(&[BATCH_SIZE, NUM_ANCHORS], (Kind::Int64, Device::Cpu)),
        ..target(5)
    };
    let output = loss_fn.forward(
        &YolactPrediction::try_from(prediction(6))?,
        &YolactTarget::try_from(target)?,
    )?;

    assert_abs_diff_eq!(scalar(&output.loc_loss), 0.0);
    assert_abs_diff_eq!(scalar(&output.classification_loss), 0.0);
    assert_abs_diff_eq!(scalar(&output.mask_loss), 0.0);
    assert!(scalar(&output.segmentation_loss) > 0.0);
    assert_abs_diff_eq!(
        scalar(&output.total_loss),
        scalar(&output.segmentation_loss),
        epsilon = 1e-6
    );
    Ok(())
}

#[test]
fn gradients_reach_predictions() -> Result<()> {
    let loss_fn = loss_fn()?;
    let YolactPredictionUnchecked {
        class_logits,
        box_offsets,
        mask_coefficients,
        prototypes,
        segmentation_logits,
    } = prediction(7);
    let leaves = [
        class_logits.set_requires_grad(true),
        box_offsets.set_requires_grad(true),
        mask_coefficients.set_requires_grad(true),
        prototypes.set_requires_grad(true),
        segmentation_logits.set_requires_grad(true),
    ];

    let prediction = YolactPrediction::try_from(YolactPredictionUnchecked {
        class_logits: leaves[0].shallow_clone(),
        box_offsets: leaves[1].shallow_clone(),
        mask_coefficients: leaves[2].shallow_clone(),
        prototypes: leaves[3].shallow_clone(),
        segmentation_logits: leaves[4].shallow_clone(),
    })?;
    let output = loss_fn.forward(&prediction, &YolactTarget::try_from(target(8))?)?;
    output.total_loss.backward();

    for leaf in &leaves {
        let grad = leaf.grad();
        assert!(grad.defined());
        assert!(!bool::from(grad.isnan().any()));
        assert!(grad.abs().sum(Kind::Float).double_value(&[]) > 0.0);
    }
    Ok(())
}

#[test]
fn reject_inconsistent_records() -> Result<()> {
    let prediction = YolactPrediction::try_from(prediction(9))?;
    let checked_target = YolactTarget::try_from(target(10))?;

    // the prediction carries 3 classes
    let wrong_classes = YolactLossInit::new(5).build()?;
    assert!(wrong_classes.forward(&prediction, &checked_target).is_err());

    // a single-image target against a two-image prediction
    let YolactTargetUnchecked {
        class_target,
        box_target,
        positiveness,
        normalized_box,
        instance_masks,
        matched_object_index,
        object_class,
        object_count,
    } = target(11);
    let first_image = YolactTarget::try_from(YolactTargetUnchecked {
        class_target: class_target.narrow(0, 0, 1),
        box_target: box_target.narrow(0, 0, 1),
        positiveness: positiveness.narrow(0, 0, 1),
        normalized_box: normalized_box.narrow(0, 0, 1),
        instance_masks: instance_masks.narrow(0, 0, 1),
        matched_object_index: matched_object_index.narrow(0, 0, 1),
        object_class: object_class.narrow(0, 0, 1),
        object_count: object_count.narrow(0, 0, 1),
    })?;
    assert!(loss_fn()?.forward(&prediction, &first_image).is_err());

    // an object class beyond the class count
    let bad_class = YolactTarget::try_from(YolactTargetUnchecked {
        object_class: Tensor::of_slice(&[1i64, 3, 2, 0]).view([BATCH_SIZE, MAX_OBJECTS]),
        ..target(12)
    })?;
    assert!(loss_fn()?.forward(&prediction, &bad_class).is_err());
    Ok(())
}
