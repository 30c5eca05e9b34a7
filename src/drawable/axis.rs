use super::{Geometry, GeometryDescriptor, DEFAULT_TUPLE_SIZE};
use crate::shader::PrimitiveMode;

const RED: [f32; 3] = [1.0, 0.0, 0.0];
const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
const BLUE: [f32; 3] = [0.0, 0.0, 1.0];

/// Reference gizmo: three line segments through the origin.
///
/// X is red, Y is blue and Z is green.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    pub extent: f32,
}

impl Default for Axis {
    fn default() -> Self {
        Self { extent: 1.0 }
    }
}

impl Geometry for Axis {
    fn build(&self) -> GeometryDescriptor {
        let e = self.extent;
        #[rustfmt::skip]
        let coordinates = vec![
            -e, 0.0, 0.0,   e, 0.0, 0.0,
            0.0, -e, 0.0,   0.0, e, 0.0,
            0.0, 0.0, -e,   0.0, 0.0, e,
        ];
        let colors = [RED, RED, BLUE, BLUE, GREEN, GREEN].concat();

        GeometryDescriptor {
            label: "axis".to_string(),
            vertex_count: 6,
            tuple_size: DEFAULT_TUPLE_SIZE,
            coordinates,
            indices: (0..6).collect(),
            colors: Some(colors),
            normals: None,
            mode: PrimitiveMode::Lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_is_three_coloured_segments() {
        let descriptor = Axis::default().build();
        assert_eq!(descriptor.vertex_count, 6);
        assert_eq!(descriptor.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(descriptor.mode, PrimitiveMode::Lines);
        assert!(descriptor.normals.is_none());
        let colors = descriptor.colors.unwrap();
        assert_eq!(&colors[0..3], &RED);
        assert_eq!(&colors[6..9], &BLUE);
        assert_eq!(&colors[15..18], &GREEN);
    }

    #[test]
    fn extent_scales_endpoints() {
        let descriptor = Axis { extent: 2.5 }.build();
        assert_eq!(descriptor.coordinates[3], 2.5);
        assert_eq!(descriptor.coordinates[16], -2.5);
    }
}
