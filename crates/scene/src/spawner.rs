//! Root job for a frame's constant-buffer update

use core::mem;

use tessera_job::{Job, JobContext};
use tracing::trace;

use crate::object::{ObjectBuffers, UpdateObjectBuffersSpawner};
use crate::sub_mesh::{SubMeshBuffers, UpdateSubMeshBuffersSpawner};

/// Spawns the object and sub-mesh buffer spawners side by side
#[derive(Debug, Default)]
pub struct UpdateConstantBuffersSpawner<'a> {
    pub objects: ObjectBuffers<'a>,
    pub sub_meshes: SubMeshBuffers<'a>,
}

impl<'a> UpdateConstantBuffersSpawner<'a> {
    pub fn new(objects: ObjectBuffers<'a>, sub_meshes: SubMeshBuffers<'a>) -> Self {
        Self {
            objects,
            sub_meshes,
        }
    }
}

impl<'a> Job<'a> for UpdateConstantBuffersSpawner<'a> {
    fn run(&mut self, ctx: &mut JobContext<'_, 'a>) {
        let objects = mem::take(&mut self.objects);
        let sub_meshes = mem::take(&mut self.sub_meshes);
        trace!(
            objects = objects.objects.len(),
            sub_meshes = sub_meshes.sub_meshes.len(),
            "updating constant buffers"
        );

        let mut spawner = ctx.spawner(2);
        spawner.create_with(UpdateObjectBuffersSpawner::new(objects));
        spawner.create_with(UpdateSubMeshBuffersSpawner::new(sub_meshes));
    }
}
