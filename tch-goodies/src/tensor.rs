use crate::{compound_tensor::TLBRTensor, common::*};

pub trait TensorExt {
    fn is_empty(&self) -> bool;

    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let mut iter = tensors.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| format_err!("the input iterator must not be empty"))?
            .borrow()
            .shallow_clone();
        let sum = iter.try_fold(first, |lhs, rhs| lhs.f_add(rhs.borrow()))?;
        Ok(sum)
    }

    fn f_weighted_mean_tensors<T>(pairs: impl IntoIterator<Item = (T, f64)>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let weighted_pairs: Vec<_> = pairs
            .into_iter()
            .map(|(tensor, weight)| {
                ensure!(weight >= 0.0, "weights must be non-negative, but get {}", weight);
                Fallible::Ok((tensor.borrow() * weight, weight))
            })
            .try_collect()?;
        let (tensors, weights): (Vec<_>, Vec<_>) = weighted_pairs.into_iter().unzip();
        let sum_weights: f64 = weights.iter().sum();
        ensure!(sum_weights > 0.0, "the sum of weights must be positive");
        let sum_tensors = Self::f_sum_tensors(tensors)?;
        Ok(sum_tensors / sum_weights)
    }

    /// Zero out the values outside the boxes.
    ///
    /// The input is a `[batch, height, width]` map and the boxes hold one
    /// normalized TLBR box per map. A cell at row `i` and column `j` is kept iff
    /// its center `(i + 0.5, j + 0.5)` lies within the box scaled to the map
    /// size. The top and left borders are inclusive while the bottom and right
    /// borders are exclusive, so a box of zero height or width keeps nothing.
    fn f_crop_by_boxes(&self, boxes: &TLBRTensor) -> Result<Tensor>;

    /// Resize `[batch, height, width]` binary masks with bilinear
    /// interpolation and re-binarize them at 0.5.
    fn f_resize_masks(&self, new_height: i64, new_width: i64) -> Result<Tensor>;
}

impl TensorExt for Tensor {
    fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    fn f_crop_by_boxes(&self, boxes: &TLBRTensor) -> Result<Tensor> {
        let (num_maps, height, width) = self.size3()?;
        ensure!(
            num_maps == boxes.num_samples(),
            "the number of maps ({}) and boxes ({}) do not match",
            num_maps,
            boxes.num_samples()
        );
        ensure!(
            self.device() == boxes.device(),
            "the maps and boxes are on different devices"
        );

        let device = self.device();
        let mask = tch::no_grad(|| -> Result<_> {
            let TLBRTensor { t, l, b, r } = boxes;
            let rows =
                (Tensor::arange(height, (Kind::Float, device)) + 0.5).f_view([1, height, 1])?;
            let cols =
                (Tensor::arange(width, (Kind::Float, device)) + 0.5).f_view([1, 1, width])?;

            let top = (t * height as f64).f_view([num_maps, 1, 1])?;
            let bottom = (b * height as f64).f_view([num_maps, 1, 1])?;
            let left = (l * width as f64).f_view([num_maps, 1, 1])?;
            let right = (r * width as f64).f_view([num_maps, 1, 1])?;

            let row_mask = rows
                .f_ge_tensor(&top)?
                .f_logical_and(&rows.f_lt_tensor(&bottom)?)?;
            let col_mask = cols
                .f_ge_tensor(&left)?
                .f_logical_and(&cols.f_lt_tensor(&right)?)?;
            let mask = row_mask.f_logical_and(&col_mask)?;
            Ok(mask.to_kind(self.kind()))
        })?;

        Ok(self * mask)
    }

    fn f_resize_masks(&self, new_height: i64, new_width: i64) -> Result<Tensor> {
        let (num_masks, height, width) = self.size3()?;
        ensure!(
            new_height > 0 && new_width > 0,
            "the target size must be positive, but get {}x{}",
            new_height,
            new_width
        );

        tch::no_grad(|| -> Result<_> {
            let masks = self.to_kind(Kind::Float);

            // nothing to interpolate
            if num_masks == 0 {
                return Ok(Tensor::zeros(
                    &[0, new_height, new_width],
                    (Kind::Float, self.device()),
                ));
            }

            let resized = if (height, width) == (new_height, new_width) {
                masks
            } else {
                masks
                    .f_unsqueeze(1)?
                    .f_upsample_bilinear2d(
                        &[new_height, new_width],
                        false,
                        None::<f64>,
                        None::<f64>,
                    )?
                    .f_squeeze_dim(1)?
            };

            Ok(resized.f_ge(0.5)?.to_kind(Kind::Float))
        })
    }
}
