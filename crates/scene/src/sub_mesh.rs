//! Skinned sub-mesh constant buffers

use tessera_job::{BatchSpawnerJob, BatchWorker, Divisible, Job, JobContext};

use crate::types::{
    BONE_COUNT_MAX, Matrix44, OBJECT_CONSTANT_FLOATS, SceneObject, SubMesh, SubMeshConstants,
};

/// Sub-meshes and their mapped buffers, index-aligned
///
/// `objects` is the whole scene object array; sub-meshes refer into it by
/// index, so it is shared by every batch rather than split.
#[derive(Debug, Default)]
pub struct SubMeshBuffers<'a> {
    pub objects: &'a [SceneObject],
    pub sub_meshes: &'a [SubMesh],
    pub buffers: &'a mut [Option<&'a mut SubMeshConstants>],
}

impl<'a> SubMeshBuffers<'a> {
    /// # Panics
    ///
    /// Panics if `sub_meshes` and `buffers` differ in length.
    pub fn new(
        objects: &'a [SceneObject],
        sub_meshes: &'a [SubMesh],
        buffers: &'a mut [Option<&'a mut SubMeshConstants>],
    ) -> Self {
        assert_eq!(
            sub_meshes.len(),
            buffers.len(),
            "one buffer slot per sub-mesh"
        );
        Self {
            objects,
            sub_meshes,
            buffers,
        }
    }
}

impl Divisible for SubMeshBuffers<'_> {
    fn len(&self) -> usize {
        self.sub_meshes.len()
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        let (sub_meshes, rest_meshes) = self.sub_meshes.split_at(mid);
        let (buffers, rest_buffers) = self.buffers.split_at_mut(mid);
        (
            Self {
                objects: self.objects,
                sub_meshes,
                buffers,
            },
            Self {
                objects: self.objects,
                sub_meshes: rest_meshes,
                buffers: rest_buffers,
            },
        )
    }
}

/// Write the bone palette of `object` as seen through `sub_mesh`
///
/// One 3x4 block per bone, capped at `BONE_COUNT_MAX`. A palette map entry
/// that is missing or points past the palette yields identity.
pub fn write_skinning_palette(object: &SceneObject, sub_mesh: &SubMesh, out: &mut SubMeshConstants) {
    let bone_count = object.bone_count().min(BONE_COUNT_MAX);
    for (bone, block) in out
        .chunks_exact_mut(OBJECT_CONSTANT_FLOATS)
        .take(bone_count)
        .enumerate()
    {
        let matrix = sub_mesh
            .skinning_palette_map
            .get(bone)
            .and_then(|&index| object.bone_palette.get(usize::from(index)))
            .unwrap_or(&Matrix44::IDENTITY);
        matrix.write_transposed_3x4(block);
    }
}

/// Writes each mapped sub-mesh's skinning palette into its buffer
///
/// Panics if a mapped sub-mesh refers to an object outside `objects`.
#[derive(Debug, Default)]
pub struct UpdateSubMeshBuffersJob<'a> {
    parameters: SubMeshBuffers<'a>,
}

impl<'a> Job<'a> for UpdateSubMeshBuffersJob<'a> {
    fn run(&mut self, _ctx: &mut JobContext<'_, 'a>) {
        let SubMeshBuffers {
            objects,
            sub_meshes,
            buffers,
        } = &mut self.parameters;
        for (sub_mesh, buffer) in sub_meshes.iter().zip(buffers.iter_mut()) {
            if let Some(out) = buffer {
                write_skinning_palette(&objects[sub_mesh.scene_object], sub_mesh, out);
            }
        }
    }
}

impl<'a> BatchWorker<'a> for UpdateSubMeshBuffersJob<'a> {
    type Parameters = SubMeshBuffers<'a>;

    fn with_parameters(parameters: SubMeshBuffers<'a>) -> Self {
        Self { parameters }
    }
}

/// Splits sub-mesh buffer updates into batches of 100, 128 per spawn
pub type UpdateSubMeshBuffersSpawner<'a> = BatchSpawnerJob<'a, UpdateSubMeshBuffersJob<'a>>;
