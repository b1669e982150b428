use crate::common::*;

/// Auxiliary semantic segmentation loss.
///
/// Every image gets a per-class binary target at the segmentation resolution,
/// where each class channel is the union of the resized masks of its objects.
/// The sigmoid cross-entropy is summed over pixels, classes and images, then
/// divided by the pixel count and the batch size.
///
/// - `segmentation_logits`: `[batch, seg_height, seg_width, classes]`
/// - `instance_masks`: `[batch, objects, mask_height, mask_width]`
/// - `object_class`: `[batch, objects]`
/// - `object_count`: `[batch]`
pub fn segmentation_loss(
    segmentation_logits: &Tensor,
    instance_masks: &Tensor,
    object_class: &Tensor,
    object_count: &Tensor,
) -> Result<Tensor> {
    let (batch_size, seg_h, seg_w, num_classes) = segmentation_logits.size4()?;
    let device = segmentation_logits.device();

    ensure!(
        object_count.size1()? == batch_size,
        "object_count must have one entry per image, but get shape {:?}",
        object_count.size()
    );

    if batch_size == 0 {
        return Ok(Tensor::zeros(&[], (Kind::Float, device)));
    }

    let losses: Vec<_> = (0..batch_size)
        .map(|batch_index| -> Result<_> {
            let logits = segmentation_logits.f_select(0, batch_index)?;
            let target = segmentation_target(
                &instance_masks.f_select(0, batch_index)?,
                &object_class.f_select(0, batch_index)?,
                object_count.f_int64_value(&[batch_index])?,
                num_classes,
                seg_h,
                seg_w,
            )?
            .f_permute(&[1, 2, 0])?
            .to_kind(logits.kind());

            let loss = logits
                .f_binary_cross_entropy_with_logits::<Tensor>(&target, None, None, Reduction::Sum)?;
            Ok(loss)
        })
        .try_collect()?;

    let loss = Tensor::f_sum_tensors(&losses)? / (seg_h * seg_w) as f64 / batch_size as f64;
    Ok(loss)
}

/// Build the `[classes, height, width]` target of one image.
///
/// Only the first `object_count` objects are read. Masks of objects sharing a
/// class are merged by union.
pub fn segmentation_target(
    instance_masks: &Tensor,
    object_class: &Tensor,
    object_count: i64,
    num_classes: i64,
    height: i64,
    width: i64,
) -> Result<Tensor> {
    let (max_objects, _, _) = instance_masks.size3()?;
    ensure!(
        object_count >= 0 && object_count <= max_objects,
        "object_count {} is out of range [0, {}]",
        object_count,
        max_objects
    );
    let device = instance_masks.device();

    tch::no_grad(|| -> Result<_> {
        let target = Tensor::zeros(&[num_classes, height, width], (Kind::Float, device));
        if object_count == 0 {
            return Ok(target);
        }

        let classes = object_class
            .f_narrow(0, 0, object_count)?
            .to_kind(Kind::Int64);
        {
            let min_class = classes.min().int64_value(&[]);
            let max_class = classes.max().int64_value(&[]);
            ensure!(
                min_class >= 0 && max_class < num_classes,
                "object_class must be in range [0, {}), but get [{}, {}]",
                num_classes,
                min_class,
                max_class
            );
        }

        let masks = instance_masks
            .f_narrow(0, 0, object_count)?
            .f_resize_masks(height, width)?;

        // masks are binary, so the clamped sum is their union
        let target = target
            .f_index_add(0, &classes, &masks)?
            .f_clamp_max(1.0)?;
        Ok(target)
    })
}
