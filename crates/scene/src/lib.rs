//! # tessera-scene
//!
//! Per-frame constant-buffer updates for a scene, expressed as jobs.
//!
//! The caller maps one buffer per static object and one per skinned
//! sub-mesh, then runs [`UpdateConstantBuffersSpawner`] as a root job. It
//! fans out into [`UpdateObjectBuffersSpawner`] and
//! [`UpdateSubMeshBuffersSpawner`], which batch the work 100 items at a
//! time.
//!
//! ```rust
//! use tessera_job::InlineExecutor;
//! use tessera_pool::{JobManager, PoolConfig};
//! use tessera_scene::*;
//!
//! let manager = JobManager::initialized(PoolConfig::default())?;
//! let objects = vec![SceneObject::new(Matrix44::translation(1.0, 2.0, 3.0))];
//! let mut storage = [[0.0f32; OBJECT_CONSTANT_FLOATS]; 1];
//! {
//!     let mut mapped: Vec<_> = storage.iter_mut().map(Some).collect();
//!     let root_job = UpdateConstantBuffersSpawner::new(
//!         ObjectBuffers::new(&objects, &mut mapped),
//!         SubMeshBuffers::default(),
//!     );
//!     let executor = InlineExecutor::new(&manager);
//!     executor.execute(1, move |root| {
//!         root.create_with(root_job);
//!     });
//! }
//! assert_eq!([storage[0][3], storage[0][7], storage[0][11]], [1.0, 2.0, 3.0]);
//! # Ok::<(), tessera_pool::PoolError>(())
//! ```

pub mod object;
pub mod spawner;
pub mod sub_mesh;
pub mod types;

pub use object::{ObjectBuffers, UpdateObjectBuffersJob, UpdateObjectBuffersSpawner};
pub use spawner::UpdateConstantBuffersSpawner;
pub use sub_mesh::{
    SubMeshBuffers, UpdateSubMeshBuffersJob, UpdateSubMeshBuffersSpawner, write_skinning_palette,
};
pub use types::{
    BONE_COUNT_MAX, Matrix44, OBJECT_CONSTANT_FLOATS, ObjectConstants, SUB_MESH_CONSTANT_FLOATS,
    SceneObject, SubMesh, SubMeshConstants,
};
