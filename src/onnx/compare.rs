//! Attribute-level comparison of exported nodes against reference nodes

use std::collections::BTreeSet;

use super::export::{LBANN_LAYOUT_ATTR, LBANN_OP_ATTR};
use super::node::{AttributeValue, OnnxNode};
use crate::error::{LaunchError, Result};

/// Tolerance for real-valued attributes
pub const FLOAT_TOLERANCE: f64 = 1e-7;

/// Outcome of [`compare_attributes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Every attribute matched
    Match,
    /// The layer became several nodes and cannot be compared to one
    Skipped,
}

/// Compare the attributes of an exported layer with a reference node
///
/// Source-tagging attributes are ignored. Any attribute present on only
/// one side is an error.
pub fn compare_attributes(exported: &[OnnxNode], reference: &OnnxNode) -> Result<Comparison> {
    let node = match exported {
        [node] => node,
        [] => {
            return Err(LaunchError::config("export produced no nodes"));
        }
        _ => {
            tracing::debug!(
                "Skipping comparison: layer exported as {} nodes",
                exported.len()
            );
            return Ok(Comparison::Skipped);
        }
    };

    let names: BTreeSet<&str> = node
        .attributes
        .keys()
        .chain(reference.attributes.keys())
        .map(String::as_str)
        .filter(|name| *name != LBANN_OP_ATTR && *name != LBANN_LAYOUT_ATTR)
        .collect();

    for name in names {
        let ours = node.attribute(name).ok_or_else(|| LaunchError::MissingAttribute {
            name: name.to_string(),
            side: "exported",
        })?;
        let theirs = reference.attribute(name).ok_or_else(|| LaunchError::MissingAttribute {
            name: name.to_string(),
            side: "reference",
        })?;
        if !values_match(ours, theirs) {
            return Err(LaunchError::AttributeMismatch {
                name: name.to_string(),
                exported: ours.to_string(),
                reference: theirs.to_string(),
            });
        }
    }
    Ok(Comparison::Match)
}

fn values_match(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::Float(x), AttributeValue::Float(y)) => floats_close(*x, *y),
        (AttributeValue::Floats(xs), AttributeValue::Floats(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| floats_close(*x, *y))
        }
        _ => a == b,
    }
}

fn floats_close(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= FLOAT_TOLERANCE * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::{
        export_layer, make_node, ConvolutionParams, Extent, LayerKind, LayerProto, PoolMode,
        PoolingParams,
    };
    use std::collections::HashMap;

    fn shapes(shape: &[i64]) -> HashMap<String, Vec<i64>> {
        HashMap::from([("x_0".to_string(), shape.to_vec())])
    }

    fn check_convolution(num_dims: usize, has_bias: bool) {
        let (n, c_in, h) = (256, 3, 224);
        let (k, p, s, d) = (3, 1, 1, 1);
        let mut inputs = vec!["x", "W"];
        if has_bias {
            inputs.push("b");
        }
        let reference = make_node("Conv", inputs, ["y"])
            .attr("kernel_shape", vec![k; num_dims])
            .attr("pads", vec![p; num_dims * 2])
            .attr("strides", vec![s; num_dims])
            .attr("dilations", vec![d; num_dims])
            .attr("group", 1i64);

        let layer = LayerProto::new(
            "conv",
            "x",
            LayerKind::Convolution(ConvolutionParams {
                num_dims,
                num_output_channels: 64,
                dims: Extent::Uniform(k),
                pads: Extent::Uniform(p),
                strides: Extent::Uniform(s),
                dilations: Extent::Uniform(d),
                num_groups: 1,
                has_bias,
            }),
        );
        let mut shape: Vec<i64> = vec![n, c_in];
        shape.extend(std::iter::repeat(h).take(num_dims));
        let export = export_layer(&layer, &shapes(&shape)).unwrap();
        assert_eq!(compare_attributes(&export.nodes, &reference).unwrap(), Comparison::Match);
    }

    #[test]
    fn test_convolution_bias() {
        check_convolution(2, true);
    }

    #[test]
    fn test_convolution_no_bias() {
        check_convolution(2, false);
    }

    #[test]
    fn test_convolution_3d_bias() {
        check_convolution(3, true);
    }

    #[test]
    fn test_convolution_3d_no_bias() {
        check_convolution(3, false);
    }

    fn check_pooling(num_dims: usize, mode: PoolMode, op: &str) {
        let (n, c, h) = (256, 3, 224);
        let (k, p, s) = (3, 1, 1);
        let reference = make_node(op, ["x"], ["y"])
            .attr("kernel_shape", vec![k; num_dims])
            .attr("pads", vec![p; num_dims * 2])
            .attr("strides", vec![s; num_dims]);

        let layer = LayerProto::new(
            "pool",
            "x",
            LayerKind::Pooling(PoolingParams {
                num_dims,
                dims: Extent::Uniform(k),
                pads: Extent::Uniform(p),
                strides: Extent::Uniform(s),
                mode,
            }),
        );
        let mut shape: Vec<i64> = vec![n, c];
        shape.extend(std::iter::repeat(h).take(num_dims));
        let export = export_layer(&layer, &shapes(&shape)).unwrap();
        assert_eq!(export.nodes[0].op_type, op);
        assert_eq!(compare_attributes(&export.nodes, &reference).unwrap(), Comparison::Match);
    }

    #[test]
    fn test_pooling_max() {
        check_pooling(2, PoolMode::Max, "MaxPool");
    }

    #[test]
    fn test_pooling_average() {
        check_pooling(2, PoolMode::Average, "AveragePool");
    }

    #[test]
    fn test_pooling_max_3d() {
        check_pooling(3, PoolMode::Max, "MaxPool");
    }

    #[test]
    fn test_pooling_average_3d() {
        check_pooling(3, PoolMode::Average, "AveragePool");
    }

    #[test]
    fn test_batch_normalization() {
        let (decay, epsilon) = (0.95, 1e-6);
        let reference = make_node("BatchNormalization", ["x", "scale", "B", "mean", "var"], ["y"])
            .attr("epsilon", epsilon)
            .attr("momentum", decay)
            .attr("spatial", 1i64);
        let layer = LayerProto::new("bn", "x", LayerKind::BatchNormalization { decay, epsilon });
        let export = export_layer(&layer, &shapes(&[100, 200, 300, 400])).unwrap();
        assert_eq!(export.output_shape, vec![100, 200, 300, 400]);
        assert_eq!(export.nodes[0].inputs.len(), 5);
        assert_eq!(compare_attributes(&export.nodes, &reference).unwrap(), Comparison::Match);
    }

    #[test]
    fn test_relu() {
        let reference = make_node("Relu", ["x"], ["y"]);
        let layer = LayerProto::new("relu", "x", LayerKind::Relu);
        let export = export_layer(&layer, &shapes(&[100, 200, 300, 400])).unwrap();
        assert_eq!(compare_attributes(&export.nodes, &reference).unwrap(), Comparison::Match);
    }

    #[test]
    fn test_average_no_pad_needs_reference_attribute() {
        let reference = make_node("AveragePool", ["x"], ["y"])
            .attr("kernel_shape", vec![3i64, 3])
            .attr("pads", vec![1i64, 1, 1, 1])
            .attr("strides", vec![1i64, 1]);
        let layer = LayerProto::new(
            "pool",
            "x",
            LayerKind::Pooling(PoolingParams {
                num_dims: 2,
                dims: Extent::Uniform(3),
                pads: Extent::Uniform(1),
                strides: Extent::Uniform(1),
                mode: PoolMode::AverageNoPad,
            }),
        );
        let export = export_layer(&layer, &shapes(&[1, 1, 8, 8])).unwrap();
        let err = compare_attributes(&export.nodes, &reference).unwrap_err();
        assert!(matches!(err, LaunchError::MissingAttribute { side: "reference", .. }));
    }

    #[test]
    fn test_mismatch_and_skip() {
        let exported = make_node("Relu", ["x"], ["y"]).attr("alpha", 0.5);
        let reference = make_node("Relu", ["x"], ["y"]).attr("alpha", 0.25);
        let err = compare_attributes(std::slice::from_ref(&exported), &reference).unwrap_err();
        assert!(matches!(err, LaunchError::AttributeMismatch { .. }));

        let nodes = vec![exported.clone(), exported];
        assert_eq!(compare_attributes(&nodes, &reference).unwrap(), Comparison::Skipped);
    }

    #[test]
    fn test_float_tolerance() {
        assert!(floats_close(1e-6, 1e-6 + 1e-9));
        assert!(!floats_close(0.95, 0.9501));
        assert!(floats_close(1e9, 1e9 + 1.0));
    }
}
