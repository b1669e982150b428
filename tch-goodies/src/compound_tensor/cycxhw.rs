use super::{area::AreaTensor, tlbr::TLBRTensor};
use crate::common::*;

/// Checked tensor of batched box parameters in CyCxHW format.
#[derive(Debug, TensorLike, Getters)]
pub struct CyCxHWTensor {
    /// The center y parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cy: Tensor,
    /// The center x parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cx: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) h: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) w: Tensor,
}

/// Unchecked tensor of batched box parameters in CyCxHW format.
#[derive(Debug, TensorLike)]
pub struct CyCxHWTensorUnchecked {
    /// The center y parameter in shape `[batch, 1]`.
    pub cy: Tensor,
    /// The center x parameter in shape `[batch, 1]`.
    pub cx: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    pub h: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    pub w: Tensor,
}

impl CyCxHWTensor {
    pub fn num_samples(&self) -> i64 {
        self.cy.size()[0]
    }

    pub fn device(&self) -> Device {
        self.cy.device()
    }

    /// Compute box area.
    pub fn area(&self) -> AreaTensor {
        let Self { h, w, .. } = self;
        AreaTensor { area: h * w }
    }
}

impl TryFrom<CyCxHWTensorUnchecked> for CyCxHWTensor {
    type Error = Error;

    fn try_from(from: CyCxHWTensorUnchecked) -> Result<Self, Self::Error> {
        let CyCxHWTensorUnchecked { cy, cx, h, w } = from;
        match (cy.size2()?, cx.size2()?, h.size2()?, w.size2()?) {
            ((cy_len, 1), (cx_len, 1), (h_len, 1), (w_len, 1)) => ensure!(
                cy_len == cx_len && cy_len == h_len && cy_len == w_len,
                "size mismatch"
            ),
            _ => bail!("size mismatch"),
        };
        ensure!(
            hashset! {
                cy.device(),
                cx.device(),
                h.device(),
                w.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );
        Ok(Self { cy, cx, h, w })
    }
}

impl From<CyCxHWTensor> for CyCxHWTensorUnchecked {
    fn from(from: CyCxHWTensor) -> Self {
        let CyCxHWTensor { cy, cx, h, w } = from;
        Self { cy, cx, h, w }
    }
}

impl From<&TLBRTensor> for CyCxHWTensor {
    fn from(from: &TLBRTensor) -> Self {
        let TLBRTensor { t, l, b, r } = from;
        let h = b - t;
        let w = r - l;
        let cy = t + &h / 2.0;
        let cx = l + &w / 2.0;
        Self { cy, cx, h, w }
    }
}
