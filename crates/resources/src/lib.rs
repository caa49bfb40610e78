//! GPU-facing data shared by the scene and the renderer.
//!
//! - Vertex layout for buffer-device-address vertex pulling
//! - Uploaded mesh buffers and their surfaces
//! - Material passes, pipelines, instances and the resources they bind
//! - Scene uniforms and push-constant blocks

pub mod material;
pub mod mesh;
pub mod shader_data;
pub mod vertex;

pub use material::{MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline, MaterialResources};
pub use mesh::{GeoSurface, GpuMeshBuffers, MeshAsset};
pub use shader_data::{ComputePushConstants, GpuDrawPushConstants, GpuSceneData};
pub use vertex::Vertex;
