mod image;
pub use image::ImageIdentifier;

mod on_node;
pub use on_node::{OnNode, OnNodeMode};

mod mount;
pub use mount::{LogParam, LogPoint, MountPoint, MountPointParam};

mod resources;
pub use resources::Resources;

mod body;
pub use body::{Plan, PlanBody, PseudoPlanName};

mod spec;
pub use spec::{PlanParam, PlanSpec};
