use crate::types::Stage;
use serde::Serialize;

/// Per-run parameters passed explicitly through every component call.
/// Nothing in the core library reads the process environment.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub stage: Stage,
    pub region: String,
    pub run_id: String,
}

impl RunContext {
    pub fn new(stage: Stage, region: impl Into<String>) -> Self {
        RunContext {
            stage,
            region: region.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique() {
        let a = RunContext::new(Stage::Dev, "us-east-1");
        let b = RunContext::new(Stage::Dev, "us-east-1");
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.stage, Stage::Dev);
        assert_eq!(a.region, "us-east-1");
    }
}
