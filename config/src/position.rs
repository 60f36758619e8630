use serde::{Deserialize, Serialize};

/// A requested on-screen position for a newly created window, expressed in
/// pixels relative to some origin the GUI front-end defines. The mux core
/// only threads this value through; it never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuiPosition {
    pub x: i32,
    pub y: i32,
}
