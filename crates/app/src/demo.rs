//! Geometry and texture for the demo scene.

use glam::{Vec2, Vec3};

use renderer_rhi::vertex::TexturedVertex;

/// Side length of the generated texture in pixels.
pub const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

const LIGHT: [u8; 4] = [230, 230, 230, 255];
const DARK: [u8; 4] = [40, 40, 48, 255];

/// Outward normal, then two tangents whose cross product is the normal.
const FACES: [(Vec3, Vec3, Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(1.0, 0.3, 0.3)),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y, Vec3::new(0.3, 1.0, 0.3)),
    (Vec3::Y, Vec3::Z, Vec3::X, Vec3::new(0.3, 0.3, 1.0)),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z, Vec3::new(1.0, 1.0, 0.3)),
    (Vec3::Z, Vec3::X, Vec3::Y, Vec3::new(1.0, 0.3, 1.0)),
    (Vec3::NEG_Z, Vec3::Y, Vec3::X, Vec3::new(0.3, 1.0, 1.0)),
];

/// A unit cube centred on the origin, four vertices per face so every face
/// gets its own texture coordinates. Triangles wind counter-clockwise seen
/// from outside.
pub fn cube() -> (Vec<TexturedVertex>, Vec<u16>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v, color) in FACES {
        let centre = normal * 0.5;
        let u = u * 0.5;
        let v = v * 0.5;
        let base = vertices.len() as u16;

        vertices.extend([
            TexturedVertex::new(centre - u - v, color, Vec2::new(0.0, 1.0)),
            TexturedVertex::new(centre + u - v, color, Vec2::new(1.0, 1.0)),
            TexturedVertex::new(centre + u + v, color, Vec2::new(1.0, 0.0)),
            TexturedVertex::new(centre - u + v, color, Vec2::new(0.0, 0.0)),
        ]);
        indices.extend([base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    (vertices, indices)
}

/// RGBA8 checkerboard of [`CHECKER_SIZE`] squared pixels.
pub fn checkerboard() -> Vec<u8> {
    let mut pixels = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let light = (x / CHECKER_CELL + y / CHECKER_CELL) % 2 == 0;
            pixels.extend_from_slice(if light { &LIGHT } else { &DARK });
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn test_cube_triangles_face_outward() {
        let (vertices, indices) = cube();
        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| vertices[triangle[i] as usize].position);
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "inward triangle {triangle:?}");
        }
    }

    #[test]
    fn test_cube_fits_unit_box() {
        let (vertices, _) = cube();
        for vertex in vertices {
            assert!(vertex.position.abs().max_element() <= 0.5 + f32::EPSILON);
        }
    }

    #[test]
    fn test_checkerboard_layout() {
        let pixels = checkerboard();
        assert_eq!(pixels.len(), (CHECKER_SIZE * CHECKER_SIZE * 4) as usize);

        let pixel = |x: u32, y: u32| {
            let offset = ((y * CHECKER_SIZE + x) * 4) as usize;
            [
                pixels[offset],
                pixels[offset + 1],
                pixels[offset + 2],
                pixels[offset + 3],
            ]
        };
        assert_eq!(pixel(0, 0), LIGHT);
        assert_eq!(pixel(CHECKER_CELL, 0), DARK);
        assert_eq!(pixel(CHECKER_CELL, CHECKER_CELL), LIGHT);
        assert_eq!(pixel(CHECKER_SIZE - 1, CHECKER_SIZE - 1), LIGHT);
    }
}
