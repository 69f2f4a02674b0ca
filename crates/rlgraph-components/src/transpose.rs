//! Batch/time transposition preprocessor

use ndarray::ArrayD;
use rlgraph_core::prelude::*;
use rlgraph_core::ComputationSettings;

/// Swaps the batch and time ranks of every primitive flowing through it.
///
/// In-socket `input`, out-socket `output`. Container inputs are split per
/// flat key and re-assembled, so each primitive flips independently.
#[derive(Debug, Clone, Copy)]
pub struct Transpose {
    id: ComponentId,
}

impl Transpose {
    /// Creates the component with in-socket `input` and out-socket `output`.
    pub fn new(graph: &mut ComponentGraph, scope: Option<&str>) -> Result<Self> {
        let settings = ComputationSettings {
            split_ops: true,
            add_auto_key_as_first_param: true,
            ..ComputationSettings::default()
        };
        let config = ComponentConfig::new(scope.unwrap_or("transpose")).with_computation_settings(settings);
        let id = graph.create_component(config)?;
        graph.add_sockets(id, ["input", "output"], None, false)?;
        graph.register_method(
            id,
            ComputationMethod::new("apply", 1, 1, |ctx, inputs| {
                let input = &inputs[0];
                let space = preprocessed_space(input.space());
                tracing::trace!(key = ?ctx.key(), space = %space, "transposing");
                Ok(vec![ctx.op("transpose", &[input], space)])
            }),
        )?;
        graph.add_computation(id, ["input"], ["output"], None, ComputationOptions::default())?;
        Ok(Self { id })
    }

    /// Component id
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Swaps the first two axes of a batch-and-time array
    pub fn apply(values: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if values.ndim() < 2 {
            return Err(GraphError::Configuration(format!(
                "cannot transpose batch and time of an array with shape {:?}",
                values.shape()
            )));
        }
        let mut transposed = values.clone();
        transposed.swap_axes(0, 1);
        Ok(transposed.as_standard_layout().into_owned())
    }
}

/// `space` with `time_major` flipped on every primitive
pub fn preprocessed_space(space: &Space) -> Space {
    space.clone().map_primitives(&|mut b| {
        b.time_major = !b.time_major;
        b
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr3, Axis};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_transpose_flips_time_major_through_build() {
        let mut g = ComponentGraph::new(Arc::new(NdArrayBackend::with_seed(0)));
        let transpose = Transpose::new(&mut g, None).unwrap();
        let input = Space::dict([
            ("obs", Space::float_box([4]).with_batch_rank().with_time_rank(false)),
            ("mask", Space::bool_box(Vec::new()).with_batch_rank().with_time_rank(true)),
        ]);
        g.connect(transpose.id(), input.clone(), "input").unwrap();

        let report = GraphBuilder::default().build(&mut g, transpose.id()).unwrap();
        let output = g.get_output(transpose.id(), None).unwrap();
        let expected = Space::dict([
            ("obs", Space::float_box([4]).with_batch_rank().with_time_rank(true)),
            ("mask", Space::bool_box(Vec::new()).with_batch_rank().with_time_rank(false)),
        ]);
        assert_eq!(report.space_of(output), Some(&expected));
        assert_eq!(report.ops().with_label("transpose").count(), 2);
    }

    #[test]
    fn test_apply_swaps_batch_and_time() {
        let values = arr3(&[[[1.0f32], [2.0], [3.0]], [[4.0], [5.0], [6.0]]]).into_dyn();
        let transposed = Transpose::apply(&values).unwrap();
        assert_eq!(transposed.shape(), &[3, 2, 1]);
        assert_eq!(
            transposed.index_axis(Axis(0), 0).iter().copied().collect::<Vec<_>>(),
            vec![1.0, 4.0]
        );
        assert!(Transpose::apply(&ndarray::arr1(&[1.0f32]).into_dyn()).is_err());
    }
}
