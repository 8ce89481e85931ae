//! JSON script files.
//!
//! A script carries assembly text, the constant table and the datasets to
//! bind:
//!
//! ```json
//! {
//!   "registers": 3,
//!   "constants": [{ "f32": 2.0 }],
//!   "source": [
//!     "inputdata_32bit 0, 0, r0",
//!     "mul r0, c0, r1",
//!     "exec_index r2",
//!     "outputdata_32bit 0, r2, r1, 0",
//!     "done"
//!   ],
//!   "data_sets": [
//!     { "inputs": [{ "f32": [1.0, 2.0, 3.0, 4.0] }], "outputs": ["f32"] }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use vectorvm::{DataSetMeta, Program, assemble};

/// Failure to load or run a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Vm(#[from] vectorvm::Error),
}

/// One constant table slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constant {
    F32(f32),
    I32(i32),
}

impl Constant {
    fn bits(self) -> u32 {
        match self {
            Self::F32(value) => value.to_bits(),
            Self::I32(value) => value as u32,
        }
    }
}

/// Element type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    F32,
    I32,
}

/// A typed input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Self::F32(values) => values.len(),
            Self::I32(values) => values.len(),
        }
    }
}

/// A dataset binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSetSpec {
    pub inputs: Vec<Column>,
    pub outputs: Vec<ColumnKind>,
    pub id_capacity: usize,
    pub acquire_tag: i32,
}

impl DataSetSpec {
    fn build(&self, output_capacity: usize) -> DataSetMeta {
        let data_set = self
            .inputs
            .iter()
            .fold(DataSetMeta::new(), |data_set, column| match column {
                Column::F32(values) => data_set.with_input_f32(values),
                Column::I32(values) => data_set.with_input_i32(values),
            });
        data_set
            .with_outputs(self.outputs.len(), output_capacity)
            .with_id_capacity(self.id_capacity)
            .with_acquire_tag(self.acquire_tag)
    }

    fn outputs_json(&self, data_set: &DataSetMeta) -> Value {
        let columns: Vec<Value> = self
            .outputs
            .iter()
            .enumerate()
            .map(|(column, kind)| match kind {
                ColumnKind::F32 => Value::from(data_set.output_f32(column)),
                ColumnKind::I32 => Value::from(data_set.output_i32(column)),
            })
            .collect();
        serde_json::json!({
            "written": data_set.written_count(),
            "columns": columns,
        })
    }
}

/// A parsed script file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub registers: usize,
    #[serde(default)]
    pub constants: Vec<Constant>,
    pub source: Vec<String>,
    #[serde(default)]
    pub data_sets: Vec<DataSetSpec>,
}

impl Script {
    /// Read and parse a script file.
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ScriptError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Assemble the source and pack the constant table.
    pub fn program(&self) -> Result<Program, ScriptError> {
        let byte_code = assemble(&self.source.join("\n"))?;
        let constants = self
            .constants
            .iter()
            .flat_map(|constant| constant.bits().to_le_bytes())
            .collect();
        Ok(Program {
            byte_code,
            constants,
        })
    }

    /// Longest input column, the default instance count.
    pub fn input_len(&self) -> usize {
        self.data_sets
            .iter()
            .flat_map(|data_set| &data_set.inputs)
            .map(Column::len)
            .max()
            .unwrap_or_default()
    }

    /// Build every dataset with output columns sized for `instances`.
    pub fn data_sets(&self, instances: usize) -> Vec<DataSetMeta> {
        self.data_sets
            .iter()
            .map(|spec| spec.build(instances))
            .collect()
    }

    /// Output columns of each dataset as JSON.
    pub fn outputs_json(&self, data_sets: &[DataSetMeta]) -> Value {
        Value::Array(
            self.data_sets
                .iter()
                .zip(data_sets)
                .map(|(spec, data_set)| spec.outputs_json(data_set))
                .collect(),
        )
    }
}
