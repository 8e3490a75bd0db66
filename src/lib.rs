// Oko renderer
//
// ARCHITECTURE:
//   Renderer (facade: camera, textures, objects)
//     └── RendererBackend (Vulkan or headless)
//           └── Device + Swapchain + frame sync
//                 └── Material shader (descriptor sets, pipeline)

pub mod backend;
pub mod config;
pub mod platform;
pub mod renderer;
pub mod watcher;

pub use config::Config;
pub use platform::SurfaceProvider;
pub use renderer::{
    create_backend, BackendKind, BackendStats, RenderPacket, Renderer, RendererBackend,
    RendererError, Texture, TextureId, INVALID_ID,
};
pub use watcher::TextureWatcher;
