pub mod section;
pub mod pmt;

pub use pmt::{parse_pmt, parse_pmt_section, Descriptor, ElementaryStream, Pmt};
