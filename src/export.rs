//! Export of reconstructed segments to PLY point clouds and Blender scripts.

use std::path::Path;

use log::info;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::camera::Camera;
use crate::error::Result;
use crate::reconstruction::Reconstruction;

/// Stable pseudo random color of a track.
pub fn id_to_color(id: u32) -> (u8, u8, u8) {
    let mut rng = ChaCha8Rng::seed_from_u64(id as u64);
    let color_num = rng.random_range(0..2u32.pow(24));
    (
        ((color_num >> 16) % 256) as u8,
        ((color_num >> 8) % 256) as u8,
        (color_num % 256) as u8,
    )
}

/// Color of segment `index` out of `count`, sampled along the turbo colormap.
pub fn segment_color(index: usize, count: usize) -> (u8, u8, u8) {
    let c = colorous::TURBO.eval_rational(index, count.max(1));
    (c.r, c.g, c.b)
}

/// ASCII PLY of the structures of every segment followed by the camera centres, colored
/// per segment. Structures at infinity are skipped.
pub fn to_ply(segments: &[Reconstruction]) -> String {
    let mut vertices = Vec::new();
    for segment in segments {
        for (track, s) in segment.structures() {
            if let Some(p) = s.coords_affine() {
                vertices.push((p, id_to_color(track)));
            }
        }
    }
    for (i, segment) in segments.iter().enumerate() {
        let color = segment_color(i, segments.len());
        for (_, camera) in segment.cameras() {
            if let Some(c) = camera.center() {
                vertices.push((c, color));
            }
        }
    }

    let mut s = String::new();
    s += "ply\nformat ascii 1.0\n";
    s += format!("element vertex {}\n", vertices.len()).as_str();
    s += "property float x\nproperty float y\nproperty float z\n";
    s += "property uchar red\nproperty uchar green\nproperty uchar blue\n";
    s += "end_header\n";
    for (p, (r, g, b)) in vertices {
        s += format!("{} {} {} {} {} {}\n", p.x, p.y, p.z, r, g, b).as_str();
    }
    s
}

pub fn export_to_ply(path: impl AsRef<Path>, segments: &[Reconstruction]) -> Result<()> {
    std::fs::write(path.as_ref(), to_ply(segments))?;
    info!("point cloud written to {}", path.as_ref().display());
    Ok(())
}

/// Python script recreating the calibrated cameras and the point cloud of `segment` in
/// Blender. Uncalibrated cameras are skipped.
pub fn to_blender_script(segment: &Reconstruction) -> String {
    let mut s = String::new();
    s += "import bpy\nimport mathutils\n\n";
    s += "scene = bpy.context.scene\n\n";
    for (image, camera) in segment.cameras() {
        let Camera::Pinhole(c) = camera else {
            continue;
        };
        let width = c.image_size.map(|(w, _)| w).unwrap_or(1).max(1) as f64;
        // blender looks down -z with y up
        let mut r = c.rotation;
        for j in 0..3 {
            r[(1, j)] = -r[(1, j)];
            r[(2, j)] = -r[(2, j)];
        }
        let center = c.center();
        s += format!("data = bpy.data.cameras.new('camera_{}')\n", image).as_str();
        s += format!("data.lens = {}\n", c.focal() / width * 32.0).as_str();
        s += "data.sensor_width = 32.0\n";
        s += format!("camera = bpy.data.objects.new('camera_{}', data)\n", image).as_str();
        s += "scene.collection.objects.link(camera)\n";
        s += format!(
            "camera.matrix_world = mathutils.Matrix((({}, {}, {}, {}), ({}, {}, {}, {}), ({}, {}, {}, {}), (0, 0, 0, 1)))\n",
            r[(0, 0)],
            r[(1, 0)],
            r[(2, 0)],
            center.x,
            r[(0, 1)],
            r[(1, 1)],
            r[(2, 1)],
            center.y,
            r[(0, 2)],
            r[(1, 2)],
            r[(2, 2)],
            center.z,
        )
        .as_str();
        s += "\n";
    }

    s += "points = [\n";
    for (_, structure) in segment.structures() {
        if let Some(p) = structure.coords_affine() {
            s += format!("    ({}, {}, {}),\n", p.x, p.y, p.z).as_str();
        }
    }
    s += "]\n";
    s += "mesh = bpy.data.meshes.new('points')\n";
    s += "mesh.from_pydata(points, [], [])\n";
    s += "cloud = bpy.data.objects.new('points', mesh)\n";
    s += "scene.collection.objects.link(cloud)\n";
    s
}

pub fn export_to_blender_script(path: impl AsRef<Path>, segment: &Reconstruction) -> Result<()> {
    std::fs::write(path.as_ref(), to_blender_script(segment))?;
    info!("blender script written to {}", path.as_ref().display());
    Ok(())
}
