//! Headless stand-in for the model renderer.
//!
//! Holds a parameter table with default values and accepts writes the way a rigged-model
//! runtime does, so the engine can run without a window.

use pet_engine::engine::ModelParameters;
use pet_types::ParameterMap;

/// Cubism 3 standard parameters with their usual rest values.
const CUBISM_DEFAULTS: &[(&str, f32)] = &[
    ("ParamAngleX", 0.0),
    ("ParamAngleY", 0.0),
    ("ParamAngleZ", 0.0),
    ("ParamBodyAngleX", 0.0),
    ("ParamEyeLOpen", 1.0),
    ("ParamEyeROpen", 1.0),
    ("ParamEyeBallX", 0.0),
    ("ParamEyeBallY", 0.0),
    ("ParamBrowLY", 0.0),
    ("ParamBrowRY", 0.0),
    ("ParamMouthForm", 0.0),
    ("ParamMouthOpenY", 0.0),
    ("ParamCheek", 0.0),
    ("ParamBreath", 0.0),
    ("Param2", 0.0),
    ("Param3", 0.0),
];

#[derive(Clone, Debug)]
pub struct HeadlessModel {
    defaults: ParameterMap,
    values: ParameterMap,
    writes: u64,
}

impl HeadlessModel {
    pub fn new(defaults: ParameterMap) -> Self {
        Self {
            values: defaults.clone(),
            defaults,
            writes: 0,
        }
    }

    pub fn cubism() -> Self {
        Self::new(CUBISM_DEFAULTS.iter().copied().collect())
    }

    /// Use the configured table, or the Cubism defaults when none is given.
    pub fn from_config(table: Option<&ParameterMap>) -> Self {
        match table {
            Some(t) if !t.is_empty() => Self::new(t.clone()),
            _ => Self::cubism(),
        }
    }

    pub fn values(&self) -> &ParameterMap {
        &self.values
    }

    /// Total accepted writes.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl ModelParameters for HeadlessModel {
    fn parameter_defaults(&self) -> ParameterMap {
        self.defaults.clone()
    }

    fn set_parameter(&mut self, id: &str, value: f32) {
        if self.values.set(id, value) {
            self.writes += 1;
        } else {
            tracing::trace!(id, "write to unknown parameter dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_falls_back_to_cubism() {
        let model = HeadlessModel::from_config(Some(&ParameterMap::new()));
        assert_eq!(model.values().get("ParamEyeLOpen"), Some(1.0));
        assert_eq!(model.parameter_defaults().len(), CUBISM_DEFAULTS.len());
    }

    #[test]
    fn unknown_parameters_are_dropped() {
        let table: ParameterMap = [("ParamA", 0.0)].into_iter().collect();
        let mut model = HeadlessModel::from_config(Some(&table));
        model.set_parameter("ParamA", 0.7);
        model.set_parameter("ParamZ", 1.0);
        assert_eq!(model.values().get("ParamA"), Some(0.7));
        assert!(!model.values().contains("ParamZ"));
        assert_eq!(model.writes(), 1);
        assert_eq!(model.parameter_defaults().get("ParamA"), Some(0.0));
    }
}
