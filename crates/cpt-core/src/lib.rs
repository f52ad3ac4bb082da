pub mod belief;
pub mod instance;
pub mod model;
pub mod sample;

pub struct ToolboxInfo;

impl ToolboxInfo {
    pub const fn name() -> &'static str {
        "cpt"
    }

    pub const fn description() -> &'static str {
        "Constrained planning toolbox evaluation engine"
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
