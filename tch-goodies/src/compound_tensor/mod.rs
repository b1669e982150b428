mod area;
mod cycxhw;
mod tlbr;

pub use area::*;
pub use cycxhw::*;
pub use tlbr::*;
