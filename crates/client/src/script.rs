use glam::Vec3;

/// Scripted movement: walks a circle of the given radius at unit input.
#[derive(Debug, Clone, Copy)]
pub struct CircleScript {
    pub radius: f32,
    pub speed: f32,
}

impl CircleScript {
    pub fn new(radius: f32, speed: f32) -> Self {
        Self { radius, speed }
    }

    pub fn angular_rate(&self) -> f32 {
        if self.radius <= 0.0 {
            0.0
        } else {
            self.speed / self.radius
        }
    }

    /// Movement input at `t` seconds: the circle's tangent.
    pub fn movement(&self, t: f64) -> Vec3 {
        if self.radius <= 0.0 {
            return Vec3::ZERO;
        }
        let angle = self.angular_rate() * t as f32;
        Vec3::new(-angle.sin(), 0.0, angle.cos())
    }
}
