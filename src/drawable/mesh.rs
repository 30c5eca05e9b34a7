use glam::Vec3;

use super::{Geometry, GeometryDescriptor, DEFAULT_TUPLE_SIZE};
use crate::mesh_io::TriMesh;
use crate::shader::PrimitiveMode;

/// Grey every mesh vertex starts out with.
pub const MESH_GREY: f32 = 0.5;

/// Triangle surface shown by the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    label: String,
    surface: TriMesh,
}

impl Mesh {
    pub fn new(label: impl Into<String>, mut surface: TriMesh) -> Self {
        if surface.normals.len() != surface.positions.len() {
            surface.compute_normals();
        }
        Self {
            label: label.into(),
            surface,
        }
    }

    pub fn surface(&self) -> &TriMesh {
        &self.surface
    }

    /// Centres the bounding box on the origin and scales its longest side to 1.
    ///
    /// Flat or single-point meshes are only centred.
    pub fn normalize(&mut self) {
        let Some((min, max)) = self.surface.bounds() else {
            return;
        };
        let centre = (min + max) * 0.5;
        let longest = (max - min).abs().max_element();
        let scale = if longest > 0.0 { 1.0 / longest } else { 1.0 };
        for position in &mut self.surface.positions {
            *position = (*position - centre) * scale;
        }
    }
}

fn flatten(vectors: &[Vec3]) -> Vec<f32> {
    vectors.iter().flat_map(|v| v.to_array()).collect()
}

impl Geometry for Mesh {
    fn build(&self) -> GeometryDescriptor {
        let vertex_count = self.surface.positions.len();
        GeometryDescriptor {
            label: self.label.clone(),
            vertex_count,
            tuple_size: DEFAULT_TUPLE_SIZE,
            coordinates: flatten(&self.surface.positions),
            indices: self.surface.triangles.iter().flatten().copied().collect(),
            colors: Some(vec![MESH_GREY; vertex_count * DEFAULT_TUPLE_SIZE]),
            normals: Some(flatten(&self.surface.normals)),
            mode: PrimitiveMode::Triangles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriMesh {
        TriMesh {
            positions: vec![
                Vec3::new(2.0, 2.0, 0.0),
                Vec3::new(6.0, 2.0, 0.0),
                Vec3::new(6.0, 4.0, 0.0),
                Vec3::new(2.0, 4.0, 0.0),
            ],
            normals: Vec::new(),
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    #[test]
    fn build_greys_every_vertex() {
        let descriptor = Mesh::new("quad", quad()).build();
        assert_eq!(descriptor.vertex_count, 4);
        assert_eq!(descriptor.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(descriptor.colors.unwrap().iter().all(|&c| c == MESH_GREY));
        let normals = descriptor.normals.unwrap();
        assert_eq!(normals.len(), 12);
        assert!((normals[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_fits_unit_box() {
        let mut mesh = Mesh::new("quad", quad());
        mesh.normalize();
        let (min, max) = mesh.surface().bounds().unwrap();
        assert!(min.abs_diff_eq(Vec3::new(-0.5, -0.25, 0.0), 1e-6));
        assert!(max.abs_diff_eq(Vec3::new(0.5, 0.25, 0.0), 1e-6));
    }

    #[test]
    fn normalize_single_point_only_centres() {
        let mut mesh = Mesh::new(
            "point",
            TriMesh {
                positions: vec![Vec3::splat(3.0)],
                normals: vec![Vec3::Z],
                triangles: Vec::new(),
            },
        );
        mesh.normalize();
        assert_eq!(mesh.surface().positions[0], Vec3::ZERO);
    }
}
