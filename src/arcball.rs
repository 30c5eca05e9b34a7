use glam::{Mat4, Quat, Vec2, Vec3};

/// Smallest viewport dimension accepted by [`ArcBall::resize`].
///
/// The scale factor divides by `dimension - 1`, so one-pixel viewports are
/// raised to two pixels instead of producing an infinite scale.
pub const MIN_DIMENSION: u32 = 2;

const MIN_AXIS_LENGTH: f32 = 1.0e-5;

/// Maps pointer drags onto rotations of a virtual unit sphere.
///
/// The ball keeps no rotation state of its own: every call to
/// [`ArcBall::rotation_between`] returns the incremental rotation for one
/// drag step, and the caller composes it onto whatever it accumulates.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcBall {
    width: u32,
    height: u32,
    scale: Vec2,
}

impl ArcBall {
    pub fn new(width: u32, height: u32) -> Self {
        let mut ball = Self {
            width: 0,
            height: 0,
            scale: Vec2::ZERO,
        };
        ball.resize(width, height);
        ball
    }

    /// Updates the viewport size and recomputes the scale factors.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(MIN_DIMENSION);
        self.height = height.max(MIN_DIMENSION);
        self.scale = Vec2::new(
            1.0 / ((self.width as f32 - 1.0) * 0.5),
            1.0 / ((self.height as f32 - 1.0) * 0.5),
        );
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    /// Projects a window coordinate onto the unit sphere.
    ///
    /// Points inside the ball's silhouette land on the upper hemisphere;
    /// points outside snap to the nearest point of the equator.
    pub fn map_to_sphere(&self, point: Vec2) -> Vec3 {
        let x = point.x * self.scale.x - 1.0;
        let y = 1.0 - point.y * self.scale.y;
        let squared_len = x * x + y * y;
        if squared_len <= 1.0 {
            Vec3::new(x, y, (1.0 - squared_len).sqrt())
        } else {
            Vec3::new(x, y, 0.0).normalize()
        }
    }

    /// Returns the incremental rotation for a drag from `last` to `current`.
    ///
    /// The clamped dot product is used directly as the quaternion's scalar
    /// part. No motion, or motion too small to define an axis, yields the
    /// identity.
    pub fn rotation_between(&self, current: Vec2, last: Vec2) -> Mat4 {
        let v0 = self.map_to_sphere(last);
        let v1 = self.map_to_sphere(current);

        let scalar = v0.dot(v1).min(1.0);
        let axis = v0.cross(v1);

        if axis.length() > MIN_AXIS_LENGTH {
            Mat4::from_quat(Quat::from_xyzw(axis.x, axis.y, axis.z, scalar))
        } else {
            Mat4::IDENTITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit(v: Vec3) {
        assert!((v.length() - 1.0).abs() < 1e-5, "{v:?} is not unit length");
    }

    #[test]
    fn sphere_points_are_unit_length() {
        let ball = ArcBall::new(800, 600);
        for &(x, y) in &[
            (400.0, 300.0),
            (0.0, 0.0),
            (799.0, 599.0),
            (120.0, 480.0),
            (-250.0, 1400.0),
            (10_000.0, 3.0),
        ] {
            assert_unit(ball.map_to_sphere(Vec2::new(x, y)));
        }
    }

    #[test]
    fn centre_maps_to_pole() {
        let ball = ArcBall::new(801, 601);
        let pole = ball.map_to_sphere(Vec2::new(400.0, 300.0));
        assert!(pole.abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn outside_points_lie_on_equator() {
        let ball = ArcBall::new(800, 600);
        let point = ball.map_to_sphere(Vec2::new(-500.0, 300.0));
        assert_eq!(point.z, 0.0);
        assert_unit(point);
    }

    #[test]
    fn zero_drag_is_identity() {
        let ball = ArcBall::new(640, 480);
        for &(x, y) in &[(0.0, 0.0), (320.0, 240.0), (639.0, 12.0), (-40.0, 900.0)] {
            let p = Vec2::new(x, y);
            assert_eq!(ball.rotation_between(p, p), Mat4::IDENTITY);
        }
    }

    #[test]
    fn drag_produces_rotation() {
        let ball = ArcBall::new(801, 601);
        let rotation = ball.rotation_between(Vec2::new(410.0, 300.0), Vec2::new(400.0, 300.0));
        assert_ne!(rotation, Mat4::IDENTITY);
        // Horizontal drags rotate about the vertical axis.
        let up = rotation.transform_vector3(Vec3::Y);
        assert!(up.abs_diff_eq(Vec3::Y, 1e-4));
    }

    #[test]
    fn resize_changes_rotation_for_same_pixels() {
        let mut ball = ArcBall::new(800, 600);
        let current = Vec2::new(110.0, 100.0);
        let last = Vec2::new(100.0, 100.0);
        let before = ball.rotation_between(current, last);
        ball.resize(400, 300);
        let after = ball.rotation_between(current, last);
        assert!(!before.abs_diff_eq(after, 1e-6));
    }

    #[test]
    fn one_pixel_viewport_is_clamped() {
        let ball = ArcBall::new(1, 1);
        assert_eq!(ball.size(), (2, 2));
        assert!(ball.scale().is_finite());
        assert_unit(ball.map_to_sphere(Vec2::new(1.0, 0.0)));
    }
}
