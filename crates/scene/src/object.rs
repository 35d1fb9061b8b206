//! Static object constant buffers

use tessera_job::{BatchSpawnerJob, BatchWorker, Divisible, Job, JobContext};

use crate::types::{ObjectConstants, SceneObject};

/// Objects and their mapped buffers, index-aligned
///
/// A `None` buffer is an object that is not drawn as a static mesh this
/// frame; it is left alone.
#[derive(Debug, Default)]
pub struct ObjectBuffers<'a> {
    pub objects: &'a [SceneObject],
    pub buffers: &'a mut [Option<&'a mut ObjectConstants>],
}

impl<'a> ObjectBuffers<'a> {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(objects: &'a [SceneObject], buffers: &'a mut [Option<&'a mut ObjectConstants>]) -> Self {
        assert_eq!(
            objects.len(),
            buffers.len(),
            "one buffer slot per scene object"
        );
        Self { objects, buffers }
    }
}

impl Divisible for ObjectBuffers<'_> {
    fn len(&self) -> usize {
        self.objects.len()
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        let (objects, rest_objects) = self.objects.split_at(mid);
        let (buffers, rest_buffers) = self.buffers.split_at_mut(mid);
        (
            Self { objects, buffers },
            Self {
                objects: rest_objects,
                buffers: rest_buffers,
            },
        )
    }
}

/// Writes each object's transposed world transform into its buffer
#[derive(Debug, Default)]
pub struct UpdateObjectBuffersJob<'a> {
    parameters: ObjectBuffers<'a>,
}

impl<'a> Job<'a> for UpdateObjectBuffersJob<'a> {
    fn run(&mut self, _ctx: &mut JobContext<'_, 'a>) {
        let ObjectBuffers { objects, buffers } = &mut self.parameters;
        for (object, buffer) in objects.iter().zip(buffers.iter_mut()) {
            if let Some(out) = buffer {
                object.transform.write_transposed_3x4(&mut out[..]);
            }
        }
    }
}

impl<'a> BatchWorker<'a> for UpdateObjectBuffersJob<'a> {
    type Parameters = ObjectBuffers<'a>;

    fn with_parameters(parameters: ObjectBuffers<'a>) -> Self {
        Self { parameters }
    }
}

/// Splits object buffer updates into batches of 100, 128 per spawn
pub type UpdateObjectBuffersSpawner<'a> = BatchSpawnerJob<'a, UpdateObjectBuffersJob<'a>>;
