pub use anyhow::{ensure, Context as _, Error, Result};
pub use getset::Getters;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use maplit::hashset;
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashSet,
    convert::TryFrom,
    path::Path,
    time::{Duration, Instant},
};
pub use tch::{Device, Kind, Reduction, Tensor};
pub use tch_goodies::{TLBRTensor, TensorExt as _};
pub use tch_tensor_like::TensorLike;

unzip_n::unzip_n!(pub 6);
