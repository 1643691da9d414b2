use std::collections::HashMap;

use crate::parse::{Value, REL_RES, TOTAL_RES};

/// Append-only time series per schema variable, kept twice: `raw` preserves
/// the original observation for export, `converted` holds the plottable f64
/// (text collapses to the 0.0 sentinel). Every series in both maps has the
/// same length at all times.
#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    names: Vec<String>,
    input_columns: usize,
    raw: HashMap<String, Vec<Value>>,
    converted: HashMap<String, Vec<f64>>,
}

impl TimeSeriesStore {
    pub fn new(schema: &[String], input_columns: usize) -> Self {
        let mut raw = HashMap::with_capacity(schema.len());
        let mut converted = HashMap::with_capacity(schema.len());
        for name in schema {
            raw.insert(name.clone(), Vec::new());
            converted.insert(name.clone(), Vec::new());
        }
        Self {
            names: schema.to_vec(),
            input_columns,
            raw,
            converted,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of leading schema columns read positionally from data rows;
    /// anything after them is derived.
    pub fn input_columns(&self) -> usize {
        self.input_columns
    }

    pub fn len(&self) -> usize {
        self.names
            .first()
            .and_then(|name| self.converted.get(name))
            .map_or(0, Vec::len)
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.converted.get(name).map(Vec::as_slice)
    }

    pub fn raw_row(&self, index: usize) -> Vec<Value> {
        self.names
            .iter()
            .filter_map(|name| self.raw.get(name).and_then(|series| series.get(index)))
            .cloned()
            .collect()
    }

    /// Append one observation per input column, in schema order, then the
    /// derived columns.
    pub fn append(&mut self, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.input_columns);
        for (name, value) in self.names.iter().zip(values) {
            if let Some(series) = self.converted.get_mut(name) {
                series.push(value.as_f64());
            }
            if let Some(series) = self.raw.get_mut(name) {
                series.push(value);
            }
        }
        self.append_derived();
    }

    // relRes is never read from the log: it is the first recorded totalRes
    // over the latest one, 0.0 until two observations exist.
    fn append_derived(&mut self) {
        if !self.names.iter().skip(self.input_columns).any(|n| n == REL_RES) {
            return;
        }
        let value = match self.converted.get(TOTAL_RES) {
            Some(total) if total.len() >= 2 => {
                let first = total[0];
                let latest = total[total.len() - 1];
                if latest == 0.0 {
                    0.0
                } else {
                    first / latest
                }
            }
            _ => 0.0,
        };
        if let Some(series) = self.converted.get_mut(REL_RES) {
            series.push(value);
        }
        if let Some(series) = self.raw.get_mut(REL_RES) {
            series.push(Value::Float(value));
        }
    }

    pub fn reset(&mut self) {
        for series in self.raw.values_mut() {
            series.clear();
        }
        for series in self.converted.values_mut() {
            series.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn series_lengths_stay_equal() {
        let names = schema(&["Iter", "C_lift", "Iter_Type"]);
        let mut store = TimeSeriesStore::new(&names, 3);
        for n in 0..5 {
            store.append(vec![
                Value::Int(n),
                Value::Float(0.1 * n as f64),
                Value::Text("RK".to_string()),
            ]);
        }
        assert_eq!(store.len(), 5);
        for name in store.names() {
            let converted = match store.series(name) {
                Some(series) => series,
                None => panic!("missing series {name}"),
            };
            assert_eq!(converted.len(), 5);
        }
    }

    #[test]
    fn text_converts_to_sentinel_but_raw_survives() {
        let names = schema(&["Iter", "Iter_Type"]);
        let mut store = TimeSeriesStore::new(&names, 2);
        store.append(vec![Value::Int(1), Value::Text("RK".to_string())]);

        assert_eq!(store.series("Iter_Type"), Some([0.0].as_slice()));
        assert_eq!(
            store.raw_row(0),
            vec![Value::Int(1), Value::Text("RK".to_string())]
        );
    }

    #[test]
    fn derived_rel_res_ratio() {
        let names = schema(&["Iter", "totalRes", "relRes"]);
        let mut store = TimeSeriesStore::new(&names, 2);
        store.append(vec![Value::Int(0), Value::Float(100.0)]);
        store.append(vec![Value::Int(1), Value::Float(25.0)]);
        store.append(vec![Value::Int(2), Value::Float(0.0)]);

        assert_eq!(store.series("relRes"), Some([0.0, 4.0, 0.0].as_slice()));
        assert_eq!(store.len(), 3);
        assert_eq!(store.raw_row(1).len(), 3);
    }

    #[test]
    fn reset_clears_every_series() {
        let names = schema(&["Iter", "C_lift"]);
        let mut store = TimeSeriesStore::new(&names, 2);
        store.append(vec![Value::Int(0), Value::Float(0.5)]);
        store.reset();
        assert_eq!(store.len(), 0);
        assert_eq!(store.series("C_lift"), Some([].as_slice()));
        assert_eq!(store.names(), ["Iter", "C_lift"]);
    }
}
