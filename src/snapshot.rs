//! Single-slot backup/restore of the context state visualizers mutate.

use crate::gl::{ALL_CAPABILITIES, Capability, GlContext, TextureId, TextureTarget};

#[derive(Clone, Debug)]
struct Backup {
    caps: Vec<(Capability, bool)>,
    units: Vec<(Option<TextureId>, Option<TextureId>)>,
    active_unit: u32,
}

/// Captures the toggle states and every texture unit's 2D/cube bindings into
/// a single slot (not a stack); `backup` overwrites any previous slot.
///
/// Restoring without a prior backup is a visualizer programming defect and
/// panics rather than silently doing nothing.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    slot: Option<Backup>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backup(&mut self, gl: &mut dyn GlContext) {
        let caps = ALL_CAPABILITIES
            .iter()
            .map(|&cap| (cap, gl.is_capability_enabled(cap)))
            .collect();

        let active_unit = gl.active_texture_unit();
        let mut units = Vec::with_capacity(gl.max_texture_units() as usize);
        for unit in 0..gl.max_texture_units() {
            gl.set_active_texture_unit(unit);
            units.push((
                gl.texture_binding(TextureTarget::Texture2d),
                gl.texture_binding(TextureTarget::TextureCubeMap),
            ));
        }
        gl.set_active_texture_unit(active_unit);

        self.slot = Some(Backup {
            caps,
            units,
            active_unit,
        });
    }

    /// # Panics
    ///
    /// Panics when no backup was taken first.
    pub fn restore(&mut self, gl: &mut dyn GlContext) {
        let backup = self
            .slot
            .take()
            .expect("state snapshot restore without a prior backup");

        for (cap, enabled) in &backup.caps {
            gl.set_capability(*cap, *enabled);
        }
        for (unit, (tex2d, cube)) in backup.units.iter().enumerate() {
            gl.set_active_texture_unit(unit as u32);
            gl.bind_texture(TextureTarget::Texture2d, *tex2d);
            gl.bind_texture(TextureTarget::TextureCubeMap, *cube);
        }
        gl.set_active_texture_unit(backup.active_unit);
    }

    pub fn has_backup(&self) -> bool {
        self.slot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::softgl::SoftContext;

    #[test]
    fn round_trip_restores_caps_and_bindings() {
        let mut gl = SoftContext::new(2, 2);
        let tex_a = gl.create_texture().unwrap();
        let tex_b = gl.create_texture().unwrap();

        gl.set_capability(Capability::Blend, true);
        gl.set_active_texture_unit(3);
        gl.bind_texture(TextureTarget::Texture2d, Some(tex_a));
        gl.set_active_texture_unit(1);

        let mut snap = StateSnapshot::new();
        snap.backup(&mut gl);

        gl.set_capability(Capability::Blend, false);
        gl.set_capability(Capability::ScissorTest, true);
        gl.set_active_texture_unit(3);
        gl.bind_texture(TextureTarget::Texture2d, Some(tex_b));
        gl.set_active_texture_unit(0);

        snap.restore(&mut gl);

        assert!(gl.is_capability_enabled(Capability::Blend));
        assert!(!gl.is_capability_enabled(Capability::ScissorTest));
        assert_eq!(gl.active_texture_unit(), 1);
        gl.set_active_texture_unit(3);
        assert_eq!(gl.texture_binding(TextureTarget::Texture2d), Some(tex_a));
    }

    #[test]
    fn backup_overwrites_previous_slot() {
        let mut gl = SoftContext::new(1, 1);
        let mut snap = StateSnapshot::new();

        gl.set_capability(Capability::DepthTest, true);
        snap.backup(&mut gl);
        gl.set_capability(Capability::DepthTest, false);
        snap.backup(&mut gl);
        gl.set_capability(Capability::DepthTest, true);

        snap.restore(&mut gl);
        assert!(!gl.is_capability_enabled(Capability::DepthTest));
    }

    #[test]
    fn restore_consumes_the_slot() {
        let mut gl = SoftContext::new(1, 1);
        let mut snap = StateSnapshot::new();
        assert!(!snap.has_backup());
        snap.backup(&mut gl);
        assert!(snap.has_backup());
        snap.restore(&mut gl);
        assert!(!snap.has_backup());
    }

    #[test]
    #[should_panic(expected = "without a prior backup")]
    fn restore_without_backup_panics() {
        let mut gl = SoftContext::new(1, 1);
        StateSnapshot::new().restore(&mut gl);
    }

    #[test]
    #[should_panic(expected = "without a prior backup")]
    fn second_restore_panics() {
        let mut gl = SoftContext::new(1, 1);
        let mut snap = StateSnapshot::new();
        snap.backup(&mut gl);
        snap.restore(&mut gl);
        snap.restore(&mut gl);
    }
}
