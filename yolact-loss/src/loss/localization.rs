use super::misc::POSITIVE;
use crate::common::*;

/// Smooth-L1 box regression loss averaged over positive anchors.
///
/// The Huber loss with delta 1 is summed over the four offsets and all
/// positive anchors of the batch, then divided by the number of positives.
/// A batch without positives yields zero.
pub fn localization_loss(
    box_offsets: &Tensor,
    box_target: &Tensor,
    positiveness: &Tensor,
) -> Result<Tensor> {
    ensure!(
        box_offsets.size() == box_target.size(),
        "box_offsets {:?} and box_target {:?} shapes differ",
        box_offsets.size(),
        box_target.size()
    );
    let device = box_offsets.device();

    let pred = box_offsets.f_reshape(&[-1, 4])?;
    let target = box_target.f_reshape(&[-1, 4])?.to_kind(pred.kind());
    let pos_indexes = positiveness.f_reshape(&[-1])?.eq(POSITIVE).nonzero().f_view([-1])?;
    let num_positives = pos_indexes.size1()?;

    if num_positives == 0 {
        return Ok(Tensor::zeros(&[], (Kind::Float, device)));
    }

    let pred = pred.f_index_select(0, &pos_indexes)?;
    let target = target.f_index_select(0, &pos_indexes)?.detach();
    let loss = pred.f_smooth_l1_loss(&target, Reduction::Sum, 1.0)? / num_positives as f64;
    Ok(loss)
}
