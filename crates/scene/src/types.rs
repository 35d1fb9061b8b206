//! Scene data read by the buffer-update jobs

/// Floats per static-object constant block: a transposed 3x4 transform
pub const OBJECT_CONSTANT_FLOATS: usize = 12;

/// Bones a skinned sub-mesh buffer can hold
pub const BONE_COUNT_MAX: usize = 75;

/// Floats per skinned sub-mesh constant buffer
pub const SUB_MESH_CONSTANT_FLOATS: usize = OBJECT_CONSTANT_FLOATS * BONE_COUNT_MAX;

/// Mapped constant data of one static object
pub type ObjectConstants = [f32; OBJECT_CONSTANT_FLOATS];

/// Mapped constant data of one skinned sub-mesh
pub type SubMeshConstants = [f32; SUB_MESH_CONSTANT_FLOATS];

/// Row-major 4x4 matrix; the translation lives in the last row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix44(pub [[f32; 4]; 4]);

impl Matrix44 {
    pub const IDENTITY: Self = Self([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    pub const fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        Self(rows)
    }

    /// Pure translation
    pub const fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = [x, y, z, 1.0];
        m
    }

    pub fn row(&self, index: usize) -> [f32; 4] {
        self.0[index]
    }

    /// Write the first three columns, each as four consecutive floats
    ///
    /// This is the 3x4 transpose shaders expect: the fourth column of an
    /// affine transform is always `(0, 0, 0, 1)` and is dropped.
    pub fn write_transposed_3x4(&self, out: &mut [f32]) {
        assert!(
            out.len() >= OBJECT_CONSTANT_FLOATS,
            "transposed 3x4 needs {OBJECT_CONSTANT_FLOATS} floats, got {}",
            out.len()
        );
        for (column, block) in out.chunks_exact_mut(4).take(3).enumerate() {
            for (row, value) in block.iter_mut().enumerate() {
                *value = self.0[row][column];
            }
        }
    }

    /// The transposed 3x4 as an owned block
    pub fn transposed_3x4(&self) -> ObjectConstants {
        let mut out = [0.0; OBJECT_CONSTANT_FLOATS];
        self.write_transposed_3x4(&mut out);
        out
    }
}

impl Default for Matrix44 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A renderable instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneObject {
    pub transform: Matrix44,
    /// Skinning matrices; empty for static objects
    pub bone_palette: Vec<Matrix44>,
}

impl SceneObject {
    pub fn new(transform: Matrix44) -> Self {
        Self {
            transform,
            bone_palette: Vec::new(),
        }
    }

    pub fn with_bones(transform: Matrix44, bone_palette: Vec<Matrix44>) -> Self {
        Self {
            transform,
            bone_palette,
        }
    }

    pub fn bone_count(&self) -> usize {
        self.bone_palette.len()
    }

    pub fn is_skinned(&self) -> bool {
        !self.bone_palette.is_empty()
    }
}

/// Part of a scene object drawn with one material
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubMesh {
    /// Index of the owning object in the scene's object array
    pub scene_object: usize,
    /// Sub-mesh bone slot to object palette index
    pub skinning_palette_map: Vec<u8>,
}

impl SubMesh {
    pub fn new(scene_object: usize, skinning_palette_map: Vec<u8>) -> Self {
        Self {
            scene_object,
            skinning_palette_map,
        }
    }
}
