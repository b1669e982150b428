use super::{area::AreaTensor, cycxhw::CyCxHWTensor};
use crate::common::*;

/// Checked tensor of batched box parameters in TLBR format.
///
/// Coordinates are expected in normalized image units, so that `t` and `b`
/// scale with the image height and `l` and `r` scale with the image width.
#[derive(Debug, TensorLike, Getters)]
pub struct TLBRTensor {
    /// The top parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) t: Tensor,
    /// The left parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) l: Tensor,
    /// The bottom parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) b: Tensor,
    /// The right parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) r: Tensor,
}

/// Unchecked tensor of batched box parameters in TLBR format.
#[derive(Debug, TensorLike)]
pub struct TLBRTensorUnchecked {
    /// The top parameter in shape `[batch, 1]`.
    pub t: Tensor,
    /// The left parameter in shape `[batch, 1]`.
    pub l: Tensor,
    /// The bottom parameter in shape `[batch, 1]`.
    pub b: Tensor,
    /// The right parameter in shape `[batch, 1]`.
    pub r: Tensor,
}

impl TLBRTensor {
    pub fn num_samples(&self) -> i64 {
        self.t.size()[0]
    }

    pub fn device(&self) -> Device {
        self.t.device()
    }

    pub fn index_select(&self, indexes: &Tensor) -> Self {
        let Self { t, l, b, r } = self;
        let t = t.index_select(0, indexes);
        let l = l.index_select(0, indexes);
        let b = b.index_select(0, indexes);
        let r = r.index_select(0, indexes);
        Self { t, l, b, r }
    }

    /// Compute the box area.
    pub fn area(&self) -> AreaTensor {
        CyCxHWTensor::from(self).area()
    }
}

/// Split a `[batch, 4]` tensor of `[t, l, b, r]` rows into a box tensor.
impl TryFrom<&Tensor> for TLBRTensor {
    type Error = Error;

    fn try_from(from: &Tensor) -> Result<Self, Self::Error> {
        let (_num, entries) = from.size2()?;
        ensure!(
            entries == 4,
            "expect a [batch, 4] box tensor, but get shape {:?}",
            from.size()
        );

        TLBRTensorUnchecked {
            t: from.i((.., 0..1)),
            l: from.i((.., 1..2)),
            b: from.i((.., 2..3)),
            r: from.i((.., 3..4)),
        }
        .try_into()
    }
}

impl TryFrom<TLBRTensorUnchecked> for TLBRTensor {
    type Error = Error;

    fn try_from(from: TLBRTensorUnchecked) -> Result<Self, Self::Error> {
        let TLBRTensorUnchecked { t, l, b, r } = from;
        match (t.size2()?, l.size2()?, b.size2()?, r.size2()?) {
            ((t_len, 1), (l_len, 1), (b_len, 1), (r_len, 1)) => ensure!(
                t_len == l_len && t_len == b_len && t_len == r_len,
                "size mismatch"
            ),
            _ => bail!("size mismatch"),
        };
        ensure!(
            hashset! {
                t.device(),
                l.device(),
                b.device(),
                r.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );
        Ok(Self { t, l, b, r })
    }
}

impl From<TLBRTensor> for TLBRTensorUnchecked {
    fn from(from: TLBRTensor) -> Self {
        let TLBRTensor { t, l, b, r } = from;
        Self { t, l, b, r }
    }
}

impl From<&CyCxHWTensor> for TLBRTensor {
    fn from(from: &CyCxHWTensor) -> Self {
        let CyCxHWTensor { cy, cx, h, w } = from;

        let t = cy - h / 2.0;
        let b = cy + h / 2.0;
        let l = cx - w / 2.0;
        let r = cx + w / 2.0;

        Self { t, l, b, r }
    }
}
