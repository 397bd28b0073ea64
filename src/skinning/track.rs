use super::interpolate::Interpolate;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Interpolation {
    /// Hold the value of the previous key until the next key.
    Step,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug)]
pub struct Key<V> {
    /// Seconds.
    pub time: f32,
    pub value: V,
}

#[derive(Clone, Debug, Default)]
pub struct Track<V: Interpolate> {
    keys: Vec<Key<V>>,
    interpolation: Interpolation,
}

impl<V: Interpolate> Track<V> {
    pub fn new(interpolation: Interpolation) -> Self {
        Self {
            keys: Vec::new(),
            interpolation,
        }
    }

    /// Build a track from parallel time and value lists. Extra entries in the longer list are
    /// ignored.
    pub fn from_keys(
        interpolation: Interpolation,
        times: impl IntoIterator<Item = f32>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let mut track = Self::new(interpolation);
        for (time, value) in times.into_iter().zip(values) {
            track.insert(time, value);
        }
        track
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline]
    pub fn first_time(&self) -> Option<f32> {
        self.keys.first().map(|k| k.time)
    }

    /// Return the time of the last key.
    #[inline]
    pub fn last_time(&self) -> Option<f32> {
        self.keys.last().map(|k| k.time)
    }

    pub fn insert(&mut self, time: f32, value: V) {
        match self.keys.binary_search_by(|k| k.time.total_cmp(&time)) {
            Ok(i) => self.keys[i].value = value,                // last wins
            Err(i) => self.keys.insert(i, Key { time, value }), // keep sorted
        }
    }

    /// Value at `time`, clamped to the first and last keys. `None` for an empty track.
    pub fn sample(&self, time: f32) -> Option<V> {
        let first = self.keys.first()?;
        let last = self.keys.last()?;

        if self.keys.len() == 1 || time <= first.time {
            return Some(first.value);
        }
        if time >= last.time {
            return Some(last.value);
        }

        let i = self.keys.partition_point(|k| k.time <= time);
        let a = self.keys[i - 1];
        let b = self.keys[i];

        Some(match self.interpolation {
            Interpolation::Step => a.value,
            Interpolation::Linear => {
                let t = ((time - a.time) / (b.time - a.time)).clamp(0.0, 1.0);
                V::interpolate(a.value, b.value, t)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[inline]
    fn approx_f(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }
    #[inline]
    fn approx_v3(a: Vec3, b: Vec3) -> bool {
        approx_f(a.x, b.x) && approx_f(a.y, b.y) && approx_f(a.z, b.z)
    }
    #[inline]
    fn approx_q(a: Quat, b: Quat) -> bool {
        // Quats can differ by sign.
        a.is_normalized() && b.is_normalized() && a.dot(b).abs() > 1.0 - 1e-4
    }

    #[test]
    fn interpolates_vec3_midpoint() {
        let mut t = Track::<Vec3>::default();
        t.insert(0.0, Vec3::new(0.0, 0.0, 0.0));
        t.insert(1.0, Vec3::new(10.0, 0.0, 0.0));

        let v = t.sample(0.5).unwrap();
        assert!(approx_v3(v, Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn exact_key_hit() {
        let mut t = Track::<Vec3>::default();
        t.insert(0.0, Vec3::splat(1.0));
        t.insert(0.8, Vec3::splat(3.0));
        t.insert(1.2, Vec3::splat(7.0));

        let v = t.sample(0.8).unwrap();
        assert!(approx_v3(v, Vec3::splat(3.0)));
    }

    #[test]
    fn clamps_before_and_after_range() {
        let mut t = Track::<Vec3>::default();
        t.insert(0.2, Vec3::new(2.0, 0.0, 0.0));
        t.insert(0.6, Vec3::new(6.0, 0.0, 0.0));

        assert!(approx_v3(t.sample(0.0).unwrap(), Vec3::new(2.0, 0.0, 0.0)));
        assert!(approx_v3(t.sample(100.0).unwrap(), Vec3::new(6.0, 0.0, 0.0)));
    }

    #[test]
    fn step_holds_previous_key() {
        let t = Track::from_keys(
            Interpolation::Step,
            [0.0, 1.0],
            [Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)],
        );

        assert!(approx_v3(t.sample(0.99).unwrap(), Vec3::ZERO));
        assert!(approx_v3(t.sample(1.0).unwrap(), Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn empty_track_has_no_value() {
        let t = Track::<Vec3>::default();
        assert!(t.is_empty());
        assert!(t.sample(0.0).is_none());
    }

    #[test]
    fn last_wins_on_duplicate_inserts() {
        let mut t = Track::<Vec3>::default();
        t.insert(0.0, Vec3::new(0.0, 0.0, 0.0));
        t.insert(0.5, Vec3::new(999.0, 0.0, 0.0));
        t.insert(0.5, Vec3::new(5.0, 0.0, 0.0));
        t.insert(1.0, Vec3::new(10.0, 0.0, 0.0));

        let v = t.sample(0.5).unwrap();
        assert!(approx_v3(v, Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(t.first_time(), Some(0.0));
        assert_eq!(t.last_time(), Some(1.0));
    }

    #[test]
    fn quaternion_shortest_arc_is_respected() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let b_flipped = Quat::from_xyzw(-b.x, -b.y, -b.z, -b.w);

        let mut t = Track::<Quat>::default();
        t.insert(0.0, a);
        t.insert(1.0, b_flipped);

        let q_mid = t.sample(0.5).unwrap();
        let expected = a.slerp(b, 0.5);
        assert!(approx_q(q_mid, expected));
    }
}
