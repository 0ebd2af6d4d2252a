#![allow(clippy::missing_errors_doc)]

//! Stateless vector engine for screening assessments.
//!
//! Pure functions only — no I/O, no database, no oracle calls. Ported
//! line-for-line from the screening engine's aggregation/tension/rigidity/
//! confidence math; every threshold below is copied verbatim, not re-tuned.

use serde::{Deserialize, Serialize};

pub const AMBIGUITY_THRESHOLD: f64 = 0.1;
pub const POLARIZATION_THRESHOLD: f64 = 0.7;
pub const LOW_VARIANCE_STD_REF: f64 = 0.3;
pub const STABILITY_STD_REF: f64 = 0.5;

const AXES: [&str; 4] = ["A1", "A2", "A3", "A4"];
const LAYERS: [&str; 5] = ["L0", "L1", "L2", "L3", "L4"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AxisWeights {
    #[serde(rename = "A1", default)]
    pub a1: f64,
    #[serde(rename = "A2", default)]
    pub a2: f64,
    #[serde(rename = "A3", default)]
    pub a3: f64,
    #[serde(rename = "A4", default)]
    pub a4: f64,
}

impl AxisWeights {
    fn values(&self) -> [f64; 4] {
        [self.a1, self.a2, self.a3, self.a4]
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerWeights {
    #[serde(rename = "L0", default)]
    pub l0: f64,
    #[serde(rename = "L1", default)]
    pub l1: f64,
    #[serde(rename = "L2", default)]
    pub l2: f64,
    #[serde(rename = "L3", default)]
    pub l3: f64,
    #[serde(rename = "L4", default)]
    pub l4: f64,
}

impl LayerWeights {
    fn values(&self) -> [f64; 5] {
        [self.l0, self.l1, self.l2, self.l3, self.l4]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub screen_id: Option<String>,
    pub axis_weights: AxisWeights,
    pub layer_weights: LayerWeights,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_answer: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AxisVector {
    #[serde(rename = "A1")]
    pub a1: f64,
    #[serde(rename = "A2")]
    pub a2: f64,
    #[serde(rename = "A3")]
    pub a3: f64,
    #[serde(rename = "A4")]
    pub a4: f64,
}

impl AxisVector {
    fn get(&self, axis: &str) -> f64 {
        match axis {
            "A1" => self.a1,
            "A2" => self.a2,
            "A3" => self.a3,
            "A4" => self.a4,
            _ => 0.0,
        }
    }

    fn values(&self) -> [f64; 4] {
        [self.a1, self.a2, self.a3, self.a4]
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerVector {
    #[serde(rename = "L0")]
    pub l0: f64,
    #[serde(rename = "L1")]
    pub l1: f64,
    #[serde(rename = "L2")]
    pub l2: f64,
    #[serde(rename = "L3")]
    pub l3: f64,
    #[serde(rename = "L4")]
    pub l4: f64,
}

impl LayerVector {
    fn get(&self, layer: &str) -> f64 {
        match layer {
            "L0" => self.l0,
            "L1" => self.l1,
            "L2" => self.l2,
            "L3" => self.l3,
            "L4" => self.l4,
            _ => 0.0,
        }
    }
}

/// The 20 `L{k}_A{j}` cells, in canonical k=0..5, j=1..5 order.
///
/// Serializes as a JSON object (`{"L0_A1": ..., ...}`), matching the
/// dict shape stored in the `tension_matrix` JSONB column.
#[derive(Debug, Clone, PartialEq)]
pub struct TensionMatrix(pub Vec<(String, f64)>);

impl TensionMatrix {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }
}

impl Default for TensionMatrix {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl Serialize for TensionMatrix {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TensionMatrix {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::deserialize(deserializer)?;
        let mut cells: Vec<(String, f64)> = map
            .into_iter()
            .filter_map(|(k, v)| v.as_f64().map(|v| (k, v)))
            .collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self(cells))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rigidity {
    pub polarization: f64,
    pub low_variance: f64,
    pub strategy_repetition: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineState {
    pub response_history: Vec<ResponseRecord>,
    pub axis_vector: AxisVector,
    pub layer_vector: LayerVector,
    #[serde(default = "default_tension_matrix")]
    pub tension_matrix: TensionMatrix,
    pub ambiguity_zones: Vec<String>,
    pub rigidity: Option<Rigidity>,
    pub confidence: f64,
    pub dominant_cells: Vec<String>,
}

fn default_tension_matrix() -> TensionMatrix {
    TensionMatrix::default()
}

/// Average axis/layer weights across all responses, then apply `tanh`.
pub fn aggregate_vectors(responses: &[ResponseRecord]) -> (AxisVector, LayerVector) {
    if responses.is_empty() {
        return (AxisVector::default(), LayerVector::default());
    }

    let n = responses.len() as f64;

    let mut raw_axis = [0.0_f64; 4];
    let mut raw_layer = [0.0_f64; 5];
    for r in responses {
        let a = r.axis_weights.values();
        let l = r.layer_weights.values();
        for i in 0..4 {
            raw_axis[i] += a[i];
        }
        for i in 0..5 {
            raw_layer[i] += l[i];
        }
    }

    let axis_vector = AxisVector {
        a1: (raw_axis[0] / n).tanh(),
        a2: (raw_axis[1] / n).tanh(),
        a3: (raw_axis[2] / n).tanh(),
        a4: (raw_axis[3] / n).tanh(),
    };
    let layer_vector = LayerVector {
        l0: (raw_layer[0] / n).tanh(),
        l1: (raw_layer[1] / n).tanh(),
        l2: (raw_layer[2] / n).tanh(),
        l3: (raw_layer[3] / n).tanh(),
        l4: (raw_layer[4] / n).tanh(),
    };

    (axis_vector, layer_vector)
}

/// `M[Lk, Aj] = LayerScore_k * AxisScore_j`, 20 cells.
pub fn compute_tension_matrix(axis_vector: &AxisVector, layer_vector: &LayerVector) -> TensionMatrix {
    let mut matrix = Vec::with_capacity(20);
    for layer in LAYERS {
        for axis in AXES {
            let key = format!("{layer}_{axis}");
            matrix.push((key, layer_vector.get(layer) * axis_vector.get(axis)));
        }
    }
    TensionMatrix(matrix)
}

fn mean_std_per_axis(responses: &[ResponseRecord]) -> [f64; 4] {
    let n = responses.len() as f64;
    let mut stds = [0.0_f64; 4];
    for (i, axis) in AXES.iter().enumerate() {
        let weights: Vec<f64> = responses
            .iter()
            .map(|r| match *axis {
                "A1" => r.axis_weights.a1,
                "A2" => r.axis_weights.a2,
                "A3" => r.axis_weights.a3,
                _ => r.axis_weights.a4,
            })
            .collect();
        let mean = weights.iter().sum::<f64>() / n;
        let variance = weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n;
        stds[i] = variance.sqrt();
    }
    stds
}

/// `0.3 * polarization + 0.3 * low_variance + 0.4 * strategy_repetition`.
pub fn compute_rigidity(responses: &[ResponseRecord], axis_vector: &AxisVector) -> Rigidity {
    if responses.is_empty() {
        return Rigidity {
            polarization: 0.0,
            low_variance: 0.0,
            strategy_repetition: 0.0,
            total: 0.0,
        };
    }

    let n = responses.len() as f64;

    let polarization = axis_vector
        .values()
        .iter()
        .filter(|v| v.abs() > POLARIZATION_THRESHOLD)
        .count() as f64
        / AXES.len() as f64;

    let stds = mean_std_per_axis(responses);
    let avg_std = stds.iter().sum::<f64>() / stds.len() as f64;
    let low_variance = (1.0 - avg_std / LOW_VARIANCE_STD_REF).clamp(0.0, 1.0);

    let mut pattern_counts: Vec<([i8; 4], usize)> = Vec::new();
    for r in responses {
        let weights = r.axis_weights.values();
        let pattern = [
            i8::from(weights[0] >= 0.0) * 2 - 1,
            i8::from(weights[1] >= 0.0) * 2 - 1,
            i8::from(weights[2] >= 0.0) * 2 - 1,
            i8::from(weights[3] >= 0.0) * 2 - 1,
        ];
        if let Some(entry) = pattern_counts.iter_mut().find(|(p, _)| *p == pattern) {
            entry.1 += 1;
        } else {
            pattern_counts.push((pattern, 1));
        }
    }
    let most_common_count = pattern_counts.iter().map(|(_, c)| *c).max().unwrap_or(0) as f64;
    let strategy_repetition = most_common_count / n;

    let total = 0.3 * polarization + 0.3 * low_variance + 0.4 * strategy_repetition;

    Rigidity {
        polarization,
        low_variance,
        strategy_repetition,
        total: total.min(1.0),
    }
}

/// Three equally-weighted components: coverage, stability, clarity.
pub fn compute_confidence(
    responses: &[ResponseRecord],
    axis_vector: &AxisVector,
    ambiguity_count: usize,
) -> f64 {
    if responses.is_empty() {
        return 0.0;
    }

    let coverage =
        axis_vector.values().iter().filter(|v| v.abs() > 0.2).count() as f64 / AXES.len() as f64;

    let stds = mean_std_per_axis(responses);
    let avg_std = stds.iter().sum::<f64>() / stds.len() as f64;
    let stability = (1.0 - avg_std / STABILITY_STD_REF).clamp(0.0, 1.0);

    let max_cells = (AXES.len() * LAYERS.len()) as f64;
    let clarity = (1.0 - ambiguity_count as f64 / max_cells).clamp(0.0, 1.0);

    ((coverage + stability + clarity) / 3.0).clamp(0.0, 1.0)
}

/// Cells where `|M[Lk,Aj]| < AMBIGUITY_THRESHOLD`, re-keyed `A{j}_L{k}`.
pub fn find_ambiguity_zones(tension_matrix: &TensionMatrix) -> Vec<String> {
    tension_matrix
        .0
        .iter()
        .filter(|(_, v)| v.abs() < AMBIGUITY_THRESHOLD)
        .map(|(key, _)| {
            let (lpart, apart) = key.split_once('_').expect("key is always L{k}_A{j}");
            format!("{apart}_{lpart}")
        })
        .collect()
}

/// Top `top_n` cells by descending `|M[Lk,Aj]|`, stable on ties (insertion order).
pub fn get_dominant_cells(tension_matrix: &TensionMatrix, top_n: usize) -> Vec<String> {
    let mut cells = tension_matrix.0.clone();
    cells.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal));
    cells.into_iter().take(top_n).map(|(k, _)| k).collect()
}

/// Appends `new_response` to the response history and recomputes every
/// derived field from scratch — never patches incrementally.
pub fn process_response(current_state: &EngineState, new_response: ResponseRecord) -> EngineState {
    let mut responses = current_state.response_history.clone();
    responses.push(new_response);

    let (axis_vector, layer_vector) = aggregate_vectors(&responses);
    let tension_matrix = compute_tension_matrix(&axis_vector, &layer_vector);
    let ambiguity_zones = find_ambiguity_zones(&tension_matrix);
    let rigidity = compute_rigidity(&responses, &axis_vector);
    let confidence = compute_confidence(&responses, &axis_vector, ambiguity_zones.len());
    let dominant_cells = get_dominant_cells(&tension_matrix, 3);

    EngineState {
        response_history: responses,
        axis_vector,
        layer_vector,
        tension_matrix,
        ambiguity_zones,
        rigidity: Some(rigidity),
        confidence,
        dominant_cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(a: [f64; 4], l: [f64; 5]) -> ResponseRecord {
        ResponseRecord {
            screen_id: None,
            axis_weights: AxisWeights {
                a1: a[0],
                a2: a[1],
                a3: a[2],
                a4: a[3],
            },
            layer_weights: LayerWeights {
                l0: l[0],
                l1: l[1],
                l2: l[2],
                l3: l[3],
                l4: l[4],
            },
            raw_answer: None,
        }
    }

    #[test]
    fn empty_state_is_all_zero() {
        let (axis, layer) = aggregate_vectors(&[]);
        assert_eq!(axis, AxisVector::default());
        assert_eq!(layer, LayerVector::default());
        assert_eq!(compute_confidence(&[], &axis, 0), 0.0);
    }

    #[test]
    fn tension_matrix_has_20_cells_in_canonical_order() {
        let axis = AxisVector { a1: 0.5, a2: -0.2, a3: 0.1, a4: 0.0 };
        let layer = LayerVector { l0: 0.3, l1: 0.1, l2: -0.4, l3: 0.2, l4: 0.0 };
        let matrix = compute_tension_matrix(&axis, &layer);
        assert_eq!(matrix.0.len(), 20);
        assert_eq!(matrix.0[0].0, "L0_A1");
        assert_eq!(matrix.0[19].0, "L4_A4");
        assert!((matrix.get("L0_A1").unwrap() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn ambiguity_zones_reorder_key_parts() {
        let axis = AxisVector { a1: 0.05, a2: 0.0, a3: 0.0, a4: 0.0 };
        let layer = LayerVector { l0: 1.0, ..Default::default() };
        let matrix = compute_tension_matrix(&axis, &layer);
        let zones = find_ambiguity_zones(&matrix);
        assert!(zones.contains(&"A1_L0".to_string()));
    }

    #[test]
    fn dominant_cells_are_sorted_by_absolute_value_descending() {
        let axis = AxisVector { a1: 0.9, a2: 0.1, a3: 0.2, a4: -0.8 };
        let layer = LayerVector { l0: 1.0, l1: 0.5, l2: 0.2, l3: 0.1, l4: 0.05 };
        let matrix = compute_tension_matrix(&axis, &layer);
        let dominant = get_dominant_cells(&matrix, 3);
        assert_eq!(dominant.len(), 3);
        assert_eq!(dominant[0], "L0_A1");
    }

    #[test]
    fn process_response_recomputes_everything_from_full_history() {
        let mut state = EngineState::default();
        for i in 0..14 {
            let v = f64::from(i % 3) - 1.0;
            state = process_response(&state, resp([v, v, v, v], [v, v, v, v, v]));
        }
        assert_eq!(state.response_history.len(), 14);
        assert!(state.confidence >= 0.0 && state.confidence <= 1.0);
        assert!(state.rigidity.unwrap().total >= 0.0 && state.rigidity.unwrap().total <= 1.0);
        assert_eq!(state.dominant_cells.len(), 3);
    }

    #[test]
    fn canonical_fourteen_response_fixture_matches_expected_shape() {
        let mut state = EngineState::default();
        for _ in 0..14 {
            state = process_response(
                &state,
                resp([-0.5, -0.3, 0.4, -0.2], [0.1, 0.05, 0.3, 0.05, 0.5]),
            );
        }

        assert!(state.axis_vector.a1 < 0.0);
        assert!(state.axis_vector.a2 < 0.0);
        assert!(state.axis_vector.a3 > 0.0);
        assert!(state.axis_vector.a4 < 0.0);
        assert!(state.layer_vector.l4 > state.layer_vector.l2);
        assert!(state.layer_vector.l2 > state.layer_vector.l0);
        assert_eq!(state.tension_matrix.0.len(), 20);
        assert_eq!(state.dominant_cells.len(), 3);
        assert!(state.confidence >= 0.0 && state.confidence <= 1.0);
    }

    #[test]
    fn purity_same_input_same_output() {
        let state = EngineState::default();
        let response = resp([0.4, -0.3, 0.2, 0.1], [0.1, 0.2, 0.3, -0.1, 0.0]);
        let first = process_response(&state, response.clone());
        let second = process_response(&state, response);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.tension_matrix, second.tension_matrix);
    }
}
