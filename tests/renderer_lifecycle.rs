// End-to-end frame lifecycle through the renderer facade on the headless backend

use glam::Mat4;
use oko_renderer::{
    create_backend, BackendKind, Config, RenderPacket, Renderer, RendererError, INVALID_ID,
};

fn config(frames_in_flight: usize, max_objects: u32) -> Config {
    let mut config = Config::default();
    config.graphics.max_frames_in_flight = frames_in_flight;
    config.graphics.max_object_count = max_objects;
    config
}

fn renderer_with(config: &Config) -> Renderer {
    let backend = create_backend(BackendKind::Headless, config, None).unwrap();
    Renderer::new(backend, "lifecycle-test", config).unwrap()
}

fn draw(renderer: &mut Renderer, frames: usize) {
    for _ in 0..frames {
        renderer
            .draw_frame(&RenderPacket { delta_time: 0.016 })
            .unwrap();
    }
}

#[test]
fn first_frame_advances_frame_number() {
    let mut renderer = renderer_with(&config(2, 16));
    renderer.add_object(Mat4::IDENTITY, None).unwrap();
    assert_eq!(renderer.frame_number(), 0);
    draw(&mut renderer, 1);
    assert_eq!(renderer.frame_number(), 1);
    // the object's uniform and the default sampler were written
    assert_eq!(renderer.stats().descriptor_writes, 2);
}

#[test]
fn minimise_and_restore_recreates_once() {
    let mut renderer = renderer_with(&config(2, 16));
    draw(&mut renderer, 1);

    renderer.on_resized(0, 0);
    draw(&mut renderer, 3);
    assert_eq!(renderer.frame_number(), 1);
    assert_eq!(renderer.stats().swapchain_recreations, 0);

    renderer.on_resized(800, 600);
    // the recreation consumes one tick
    draw(&mut renderer, 1);
    assert_eq!(renderer.frame_number(), 1);
    draw(&mut renderer, 1);
    assert_eq!(renderer.frame_number(), 2);
    assert_eq!(renderer.stats().swapchain_recreations, 1);
}

#[test]
fn repeated_resize_notifications_recreate_once() {
    let mut renderer = renderer_with(&config(2, 16));
    draw(&mut renderer, 1);

    renderer.on_resized(1024, 768);
    renderer.on_resized(1024, 768);
    renderer.on_resized(1024, 768);
    draw(&mut renderer, 4);

    assert_eq!(renderer.stats().swapchain_recreations, 1);
    assert_eq!(renderer.frame_number(), 4);
}

#[test]
fn released_object_slots_are_not_reused() {
    let mut renderer = renderer_with(&config(2, 3));
    let first = renderer.add_object(Mat4::IDENTITY, None).unwrap();
    renderer.add_object(Mat4::IDENTITY, None).unwrap();

    let removed = renderer.remove_object(first).unwrap();
    assert_eq!(removed.object_id, 0);

    let index = renderer.add_object(Mat4::IDENTITY, None).unwrap();
    assert_eq!(renderer.objects()[index].object_id, 2);

    let err = renderer.add_object(Mat4::IDENTITY, None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RendererError>(),
        Some(RendererError::ObjectCapacityExhausted { capacity: 3 })
    ));
}

#[test]
fn texture_reload_rewrites_sampler_once_per_frame_slot() {
    let mut renderer = renderer_with(&config(2, 16));
    let texture = renderer.create_texture_slot("pixel");
    renderer
        .upload_texture(texture, "pixel", 1, 1, false, &[10, 20, 30, 255])
        .unwrap();
    renderer.add_object(Mat4::IDENTITY, Some(texture)).unwrap();

    // uniform + sampler for each of the two frame slots
    draw(&mut renderer, 2);
    assert_eq!(renderer.stats().descriptor_writes, 4);

    // nothing changed, nothing written
    draw(&mut renderer, 4);
    assert_eq!(renderer.stats().descriptor_writes, 4);

    renderer
        .upload_texture(texture, "pixel", 1, 1, false, &[40, 50, 60, 255])
        .unwrap();
    assert_eq!(renderer.texture(texture).unwrap().generation, 1);

    draw(&mut renderer, 4);
    assert_eq!(renderer.stats().descriptor_writes, 6);
}

#[test]
fn switching_between_textures_of_equal_generation_rebinds() {
    let mut renderer = renderer_with(&config(2, 16));
    let first = renderer.create_texture_slot("first");
    let second = renderer.create_texture_slot("second");
    renderer
        .upload_texture(first, "first", 1, 1, false, &[255, 0, 0, 255])
        .unwrap();
    renderer
        .upload_texture(second, "second", 1, 1, false, &[0, 255, 0, 255])
        .unwrap();
    assert_eq!(renderer.texture(first).unwrap().generation, 0);
    assert_eq!(renderer.texture(second).unwrap().generation, 0);

    let index = renderer.add_object(Mat4::IDENTITY, Some(first)).unwrap();
    draw(&mut renderer, 2);
    assert_eq!(renderer.stats().descriptor_writes, 4);

    renderer.set_object_texture(index, Some(second));
    draw(&mut renderer, 2);
    assert_eq!(renderer.stats().descriptor_writes, 6);

    // setting the same texture again changes nothing
    renderer.set_object_texture(index, Some(second));
    draw(&mut renderer, 2);
    assert_eq!(renderer.stats().descriptor_writes, 6);
}

#[test]
fn unloaded_texture_binds_default_every_frame() {
    let mut renderer = renderer_with(&config(2, 16));
    let texture = renderer.create_texture_slot("pending");
    renderer.add_object(Mat4::IDENTITY, Some(texture)).unwrap();
    assert_eq!(renderer.texture(texture).unwrap().generation, INVALID_ID);

    draw(&mut renderer, 4);
    // two uniform writes, then the default sampler on every frame
    assert_eq!(renderer.stats().descriptor_writes, 6);

    renderer
        .upload_texture(texture, "pending", 1, 1, false, &[1, 1, 1, 255])
        .unwrap();
    draw(&mut renderer, 4);
    // the real texture is picked up once per frame slot
    assert_eq!(renderer.stats().descriptor_writes, 8);
}

#[test]
fn texture_loads_from_asset_directory() {
    let dir = tempfile::tempdir().unwrap();
    let textures = dir.path().join("textures");
    std::fs::create_dir_all(&textures).unwrap();
    image::RgbaImage::from_pixel(2, 3, image::Rgba([0, 0, 255, 128]))
        .save(textures.join("glass.png"))
        .unwrap();

    let mut config = config(2, 16);
    config.assets.root = dir.path().to_path_buf();
    let mut renderer = renderer_with(&config);

    let id = renderer.create_texture_slot("glass");
    renderer.load_texture(id, "glass").unwrap();
    let texture = renderer.texture(id).unwrap();
    assert_eq!((texture.width, texture.height), (2, 3));
    assert!(texture.has_transparency);
    assert!(texture.is_loaded());

    // a missing file leaves the loaded texture untouched
    assert!(renderer.load_texture(id, "missing").is_err());
    assert_eq!(renderer.texture(id).unwrap().generation, 0);
}

#[test]
fn shutdown_is_idempotent() {
    let mut renderer = renderer_with(&config(2, 16));
    renderer.add_object(Mat4::IDENTITY, None).unwrap();
    draw(&mut renderer, 2);
    renderer.shutdown();
    renderer.shutdown();
    assert_eq!(renderer.frame_number(), 2);
}
