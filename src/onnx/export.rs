//! Layer to node export

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::node::{make_node, OnnxNode};
use crate::error::{LaunchError, Result};

/// Attribute naming the source layer type
pub const LBANN_OP_ATTR: &str = "lbannOp";

/// Attribute naming the source data layout
pub const LBANN_LAYOUT_ATTR: &str = "lbannDataLayout";

/// A spatial parameter given once for all dimensions or per dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extent {
    /// Same value in every dimension (`*_i` fields)
    Uniform(i64),
    /// One value per dimension
    PerDim(Vec<i64>),
}

impl Extent {
    fn expand(&self, num_dims: usize, layer: &str, what: &str) -> Result<Vec<i64>> {
        match self {
            Extent::Uniform(v) => Ok(vec![*v; num_dims]),
            Extent::PerDim(values) if values.len() == num_dims => Ok(values.clone()),
            Extent::PerDim(values) => Err(LaunchError::unsupported_layer(
                layer,
                format!("{} has {} values for {} dimensions", what, values.len(), num_dims),
            )),
        }
    }
}

/// Convolution window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvolutionParams {
    /// Spatial dimensions
    pub num_dims: usize,
    /// Output channels
    pub num_output_channels: i64,
    /// Kernel size
    pub dims: Extent,
    /// Zero padding at each end
    pub pads: Extent,
    /// Strides
    pub strides: Extent,
    /// Dilations
    pub dilations: Extent,
    /// Channel groups
    pub num_groups: i64,
    /// Bias input present
    pub has_bias: bool,
}

/// Pooling reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// Maximum
    Max,
    /// Mean including padding
    Average,
    /// Mean excluding padding
    AverageNoPad,
}

/// Pooling window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingParams {
    /// Spatial dimensions
    pub num_dims: usize,
    /// Window size
    pub dims: Extent,
    /// Zero padding at each end
    pub pads: Extent,
    /// Strides
    pub strides: Extent,
    /// Reduction
    pub mode: PoolMode,
}

/// Layer type and its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    /// N-d convolution
    Convolution(ConvolutionParams),
    /// N-d pooling
    Pooling(PoolingParams),
    /// Batch normalization
    BatchNormalization {
        /// Running statistics decay
        decay: f64,
        /// Variance stabilizer
        epsilon: f64,
    },
    /// Rectified linear unit
    Relu,
}

impl LayerKind {
    /// Layer type name as the framework spells it
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Convolution(_) => "convolution",
            LayerKind::Pooling(_) => "pooling",
            LayerKind::BatchNormalization { .. } => "batch_normalization",
            LayerKind::Relu => "relu",
        }
    }
}

/// A layer as exported by the model description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerProto {
    /// Layer name
    pub name: String,
    /// Parent layer names
    pub parents: Vec<String>,
    /// Data layout
    pub data_layout: String,
    /// Type and settings
    pub kind: LayerKind,
}

impl LayerProto {
    /// Data-parallel layer with one parent
    pub fn new(name: impl Into<String>, parent: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent.into()],
            data_layout: "data_parallel".to_string(),
            kind,
        }
    }

    fn output_name(&self) -> String {
        format!("{}_0", self.name)
    }

    fn param_name(&self, index: usize) -> String {
        format!("{}_p{}", self.name, index)
    }
}

/// Nodes produced for one layer, with the layer's output shape
#[derive(Debug, Clone, PartialEq)]
pub struct LayerExport {
    /// Exported nodes
    pub nodes: Vec<OnnxNode>,
    /// Shape of the layer output
    pub output_shape: Vec<i64>,
}

/// Export a layer given the shapes of its inputs
///
/// Input shapes are keyed `{parent}_0` and include the batch and channel
/// dimensions.
pub fn export_layer(
    layer: &LayerProto,
    input_shapes: &HashMap<String, Vec<i64>>,
) -> Result<LayerExport> {
    let parent = layer
        .parents
        .first()
        .ok_or_else(|| LaunchError::unsupported_layer(&layer.name, "layer has no parent"))?;
    let input = format!("{}_0", parent);
    let shape = input_shapes
        .get(&input)
        .ok_or_else(|| LaunchError::MissingInputShape(input.clone()))?;

    let (node, output_shape) = match &layer.kind {
        LayerKind::Convolution(params) => export_convolution(layer, params, &input, shape)?,
        LayerKind::Pooling(params) => export_pooling(layer, params, &input, shape)?,
        LayerKind::BatchNormalization { decay, epsilon } => {
            let inputs = std::iter::once(input.clone()).chain((0..4).map(|i| layer.param_name(i)));
            let node = make_node("BatchNormalization", inputs, [layer.output_name()])
                .attr("epsilon", *epsilon)
                .attr("momentum", *decay)
                .attr("spatial", 1i64);
            (node, shape.clone())
        }
        LayerKind::Relu => (
            make_node("Relu", [input.clone()], [layer.output_name()]),
            shape.clone(),
        ),
    };

    let node = node
        .attr(LBANN_OP_ATTR, layer.kind.type_name())
        .attr(LBANN_LAYOUT_ATTR, layer.data_layout.as_str());

    tracing::trace!("Exported {} as {}", layer.name, node.op_type);
    Ok(LayerExport {
        nodes: vec![node],
        output_shape,
    })
}

fn spatial_input<'a>(layer: &LayerProto, num_dims: usize, shape: &'a [i64]) -> Result<&'a [i64]> {
    if shape.len() != num_dims + 2 {
        return Err(LaunchError::unsupported_layer(
            &layer.name,
            format!("expected a {}-d input, got shape {:?}", num_dims + 2, shape),
        ));
    }
    Ok(&shape[2..])
}

fn check_positive(layer: &LayerProto, what: &str, values: &[i64]) -> Result<()> {
    if values.iter().any(|&v| v <= 0) {
        return Err(LaunchError::unsupported_layer(
            &layer.name,
            format!("{} must be positive, got {:?}", what, values),
        ));
    }
    Ok(())
}

fn begin_and_end(pads: &[i64]) -> Vec<i64> {
    pads.iter().chain(pads.iter()).copied().collect()
}

fn export_convolution(
    layer: &LayerProto,
    params: &ConvolutionParams,
    input: &str,
    shape: &[i64],
) -> Result<(OnnxNode, Vec<i64>)> {
    let n = params.num_dims;
    let spatial = spatial_input(layer, n, shape)?;
    let kernel = params.dims.expand(n, &layer.name, "conv_dims")?;
    let pads = params.pads.expand(n, &layer.name, "conv_pads")?;
    let strides = params.strides.expand(n, &layer.name, "conv_strides")?;
    let dilations = params.dilations.expand(n, &layer.name, "conv_dilations")?;
    check_positive(layer, "conv_strides", &strides)?;
    check_positive(layer, "conv_dilations", &dilations)?;

    let mut output_shape = vec![shape[0], params.num_output_channels];
    for i in 0..n {
        let span = spatial[i] + 2 * pads[i] - dilations[i] * (kernel[i] - 1) - 1;
        output_shape.push(span / strides[i] + 1);
    }

    let mut inputs = vec![input.to_string(), layer.param_name(0)];
    if params.has_bias {
        inputs.push(layer.param_name(1));
    }

    let node = make_node("Conv", inputs, [layer.output_name()])
        .attr("kernel_shape", kernel)
        .attr("pads", begin_and_end(&pads))
        .attr("strides", strides)
        .attr("dilations", dilations)
        .attr("group", params.num_groups);
    Ok((node, output_shape))
}

fn export_pooling(
    layer: &LayerProto,
    params: &PoolingParams,
    input: &str,
    shape: &[i64],
) -> Result<(OnnxNode, Vec<i64>)> {
    let n = params.num_dims;
    let spatial = spatial_input(layer, n, shape)?;
    let kernel = params.dims.expand(n, &layer.name, "pool_dims")?;
    let pads = params.pads.expand(n, &layer.name, "pool_pads")?;
    let strides = params.strides.expand(n, &layer.name, "pool_strides")?;
    check_positive(layer, "pool_strides", &strides)?;

    let mut output_shape = shape[..2].to_vec();
    for i in 0..n {
        output_shape.push((spatial[i] + 2 * pads[i] - kernel[i]) / strides[i] + 1);
    }

    let op = match params.mode {
        PoolMode::Max => "MaxPool",
        PoolMode::Average | PoolMode::AverageNoPad => "AveragePool",
    };
    let mut node = make_node(op, [input.to_string()], [layer.output_name()])
        .attr("kernel_shape", kernel)
        .attr("pads", begin_and_end(&pads))
        .attr("strides", strides);
    if params.mode == PoolMode::AverageNoPad {
        node = node.attr("count_include_pad", 0i64);
    }
    Ok((node, output_shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::AttributeValue;

    fn shapes(shape: &[i64]) -> HashMap<String, Vec<i64>> {
        HashMap::from([("x_0".to_string(), shape.to_vec())])
    }

    fn conv(num_dims: usize, has_bias: bool) -> LayerProto {
        LayerProto::new(
            "conv1",
            "x",
            LayerKind::Convolution(ConvolutionParams {
                num_dims,
                num_output_channels: 64,
                dims: Extent::Uniform(3),
                pads: Extent::Uniform(1),
                strides: Extent::Uniform(1),
                dilations: Extent::Uniform(1),
                num_groups: 1,
                has_bias,
            }),
        )
    }

    #[test]
    fn test_conv_output_shape_and_inputs() {
        let export = export_layer(&conv(2, true), &shapes(&[256, 3, 224, 224])).unwrap();
        assert_eq!(export.output_shape, vec![256, 64, 224, 224]);
        let node = &export.nodes[0];
        assert_eq!(node.inputs, vec!["x_0", "conv1_p0", "conv1_p1"]);
        assert_eq!(node.outputs, vec!["conv1_0"]);
        assert_eq!(node.attribute("lbannOp"), Some(&"convolution".into()));

        let export = export_layer(&conv(2, false), &shapes(&[256, 3, 224, 224])).unwrap();
        assert_eq!(export.nodes[0].inputs.len(), 2);
    }

    #[test]
    fn test_conv_vector_params() {
        let layer = LayerProto::new(
            "conv",
            "x",
            LayerKind::Convolution(ConvolutionParams {
                num_dims: 3,
                num_output_channels: 16,
                dims: Extent::PerDim(vec![3, 3, 1]),
                pads: Extent::PerDim(vec![0, 1, 0]),
                strides: Extent::PerDim(vec![2, 1, 1]),
                dilations: Extent::Uniform(1),
                num_groups: 1,
                has_bias: false,
            }),
        );
        let export = export_layer(&layer, &shapes(&[4, 4, 128, 128, 128])).unwrap();
        assert_eq!(export.output_shape, vec![4, 16, 63, 128, 128]);
        assert_eq!(
            export.nodes[0].attribute("pads"),
            Some(&AttributeValue::Ints(vec![0, 1, 0, 0, 1, 0]))
        );
    }

    #[test]
    fn test_pooling_shape() {
        let layer = LayerProto::new(
            "pool",
            "x",
            LayerKind::Pooling(PoolingParams {
                num_dims: 3,
                dims: Extent::Uniform(2),
                pads: Extent::Uniform(0),
                strides: Extent::Uniform(2),
                mode: PoolMode::AverageNoPad,
            }),
        );
        let export = export_layer(&layer, &shapes(&[8, 16, 64, 64, 64])).unwrap();
        assert_eq!(export.output_shape, vec![8, 16, 32, 32, 32]);
        let node = &export.nodes[0];
        assert_eq!(node.op_type, "AveragePool");
        assert_eq!(node.attribute("count_include_pad"), Some(&AttributeValue::Int(0)));
    }

    #[test]
    fn test_missing_input_shape() {
        let err = export_layer(&conv(2, false), &HashMap::new()).unwrap_err();
        assert!(matches!(err, LaunchError::MissingInputShape(ref name) if name == "x_0"));
    }

    #[test]
    fn test_rank_mismatch() {
        let err = export_layer(&conv(3, false), &shapes(&[256, 3, 224, 224])).unwrap_err();
        assert!(matches!(err, LaunchError::UnsupportedLayer { .. }));
    }
}
