//! Flat parameter storage with a block layout.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};

/// How a parameter block is used by the network.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Affine layer stored row-major as `n_out × (n_in + 1)`, bias in the last column.
    Dense { n_in: usize, n_out: usize },
    /// Any other parameters (embeddings, envelopes, determinant weights, ...).
    Generic,
}

/// A named contiguous slice of the flat parameter vector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParamBlock {
    pub name: String,
    pub offset: usize,
    pub len: usize,
    pub kind: BlockKind,
}

impl ParamBlock {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Ordered list of parameter blocks.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamLayout {
    blocks: Vec<ParamBlock>,
    len: usize,
}

impl ParamLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a dense block and return its index.
    pub fn add_dense(&mut self, name: impl Into<String>, n_in: usize, n_out: usize) -> usize {
        self.push(name.into(), n_out * (n_in + 1), BlockKind::Dense { n_in, n_out })
    }

    /// Append a generic block of `len` parameters and return its index.
    pub fn add_generic(&mut self, name: impl Into<String>, len: usize) -> usize {
        self.push(name.into(), len, BlockKind::Generic)
    }

    fn push(&mut self, name: String, len: usize, kind: BlockKind) -> usize {
        self.blocks.push(ParamBlock { name, offset: self.len, len, kind });
        self.len += len;
        self.blocks.len() - 1
    }

    pub fn blocks(&self) -> &[ParamBlock] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> &ParamBlock {
        &self.blocks[index]
    }

    pub fn find(&self, name: &str) -> Option<&ParamBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Total number of parameters.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Parameter values together with their layout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parameters {
    #[serde(with = "crate::serde_float::vec")]
    values: Vec<f64>,
    layout: ParamLayout,
}

impl Parameters {
    pub fn new(layout: ParamLayout, values: Vec<f64>) -> Result<Self> {
        if values.len() != layout.len() {
            return Err(VmcError::InvalidConfig(format!(
                "parameter vector has {} entries, layout expects {}",
                values.len(),
                layout.len()
            )));
        }
        Ok(Self { values, layout })
    }

    pub fn zeros(layout: ParamLayout) -> Self {
        let values = vec![0.0; layout.len()];
        Self { values, layout }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values of the named block.
    pub fn block(&self, name: &str) -> Option<&[f64]> {
        self.layout.find(name).map(|b| &self.values[b.range()])
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Same layout, new values.
    pub fn with_values(&self, values: Vec<f64>) -> Result<Self> {
        Self::new(self.layout.clone(), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        let mut layout = ParamLayout::new();
        let a = layout.add_dense("a", 3, 2);
        let b = layout.add_generic("b", 5);
        assert_eq!(layout.block(a).range(), 0..8);
        assert_eq!(layout.block(b).range(), 8..13);
        assert_eq!(layout.len(), 13);
        assert_eq!(layout.find("b").map(|blk| blk.offset), Some(8));
    }

    #[test]
    fn test_parameters_length_is_checked() {
        let mut layout = ParamLayout::new();
        layout.add_generic("x", 2);
        assert!(Parameters::new(layout.clone(), vec![1.0]).is_err());
        let p = Parameters::new(layout, vec![3.0, 4.0]).unwrap();
        assert_eq!(p.norm(), 5.0);
        assert_eq!(p.block("x"), Some(&[3.0, 4.0][..]));
    }
}
