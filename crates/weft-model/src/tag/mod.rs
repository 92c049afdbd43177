mod tag;
pub use tag::{
    KEY_KNIT_ID, KEY_KNIT_TIMESTAMP, KEY_KNIT_TRANSIENT, SYSTEM_TAG_PREFIX, Tag,
    VALUE_TRANSIENT_FAILED, VALUE_TRANSIENT_PROCESSING,
};

mod set;
pub use set::{TagDelta, TagSet};

pub(crate) mod timestamp;
