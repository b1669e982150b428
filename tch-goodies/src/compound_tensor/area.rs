use crate::common::*;

/// Checked tensor of batched areas.
#[derive(Debug, TensorLike, Getters)]
pub struct AreaTensor {
    /// The area in shape `[batch, 1]`.
    #[get = "pub"]
    pub(super) area: Tensor,
}

impl AreaTensor {
    pub fn num_samples(&self) -> i64 {
        self.area.size()[0]
    }

    pub fn device(&self) -> Device {
        self.area.device()
    }

    /// Flatten the areas into a `[batch]` tensor, raising every value to at least `min`.
    pub fn clamp_min_flat(&self, min: f64) -> Tensor {
        self.area.view([-1]).clamp_min(min)
    }
}
