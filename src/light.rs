use glam::Vec3;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::shader::{ShaderContext, ShaderInterface, UniformSlot, UniformValue};

/// Initial light values, as read from the `[light]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub ambient: f32,
    pub fixed: bool,
    pub enabled: bool,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 200.0, 100.0],
            color: [0.7, 0.7, 0.7],
            ambient: 0.4,
            fixed: true,
            enabled: true,
        }
    }
}

/// Single point light mirrored into the shader's uniforms.
///
/// Every field remembers the uniform slot it is pushed to. Slots can be
/// absent when the shader does not use the field; the value is still kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    position: Vec3,
    color: Vec3,
    ambient: f32,
    fixed: bool,
    on: bool,
    position_slot: Option<UniformSlot>,
    color_slot: Option<UniformSlot>,
    ambient_slot: Option<UniformSlot>,
    fixed_slot: Option<UniformSlot>,
    on_slot: Option<UniformSlot>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            ambient: 0.5,
            fixed: false,
            on: false,
            position_slot: None,
            color_slot: None,
            ambient_slot: None,
            fixed_slot: None,
            on_slot: None,
        }
    }
}

fn check_slot(slot: Option<UniformSlot>, name: &str) -> Option<UniformSlot> {
    if slot.is_none() {
        warn!("uniform {name} wasn't found in the shader");
    }
    slot
}

impl Light {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a light bound to the standard uniform names of `interface`.
    pub fn from_config(config: &LightConfig, interface: &ShaderInterface) -> Self {
        let mut light = Self::new();
        light
            .set_position(config.position.into(), interface.uniform("light_position"))
            .set_color(config.color.into(), interface.uniform("light_color"))
            .set_ambient(config.ambient, interface.uniform("light_ambient"))
            .set_fixed(config.fixed, interface.uniform("light_fixed"));
        if config.enabled {
            light.enable(interface.uniform("light_on"));
        }
        light
    }

    pub fn set_position(&mut self, position: Vec3, slot: Option<UniformSlot>) -> &mut Self {
        self.position_slot = check_slot(slot, "light_position");
        self.update_position(position)
    }

    pub fn set_color(&mut self, color: Vec3, slot: Option<UniformSlot>) -> &mut Self {
        self.color_slot = check_slot(slot, "light_color");
        self.update_color(color)
    }

    pub fn set_ambient(&mut self, ambient: f32, slot: Option<UniformSlot>) -> &mut Self {
        self.ambient_slot = check_slot(slot, "light_ambient");
        self.update_ambient(ambient)
    }

    pub fn set_fixed(&mut self, fixed: bool, slot: Option<UniformSlot>) -> &mut Self {
        self.fixed_slot = check_slot(slot, "light_fixed");
        self.update_fixed(fixed)
    }

    pub fn enable(&mut self, slot: Option<UniformSlot>) -> &mut Self {
        self.on_slot = check_slot(slot, "light_on");
        self.on = true;
        self
    }

    /// Switches the light off and forgets its on/off slot.
    pub fn disable(&mut self) -> &mut Self {
        self.on = false;
        self.on_slot = None;
        self
    }

    pub fn update_position(&mut self, position: Vec3) -> &mut Self {
        self.position = position;
        self
    }

    pub fn update_color(&mut self, color: Vec3) -> &mut Self {
        self.color = color;
        self
    }

    pub fn update_ambient(&mut self, ambient: f32) -> &mut Self {
        self.ambient = ambient;
        self
    }

    pub fn update_fixed(&mut self, fixed: bool) -> &mut Self {
        self.fixed = fixed;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn ambient(&self) -> f32 {
        self.ambient
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// On, and the shader has somewhere to receive it.
    pub fn is_enabled(&self) -> bool {
        self.on && self.on_slot.is_some()
    }

    /// Pushes every field whose slot is known. Does nothing while disabled.
    pub fn sync_to_shader<S: ShaderContext + ?Sized>(&self, shader: &mut S) {
        let Some(on_slot) = self.on_slot.filter(|_| self.on) else {
            return;
        };
        shader.set_uniform(on_slot, self.on.into());

        let fields: [(&str, Option<UniformSlot>, UniformValue); 4] = [
            ("light_position", self.position_slot, self.position.into()),
            ("light_color", self.color_slot, self.color.into()),
            ("light_ambient", self.ambient_slot, self.ambient.into()),
            ("light_fixed", self.fixed_slot, self.fixed.into()),
        ];
        for (name, slot, value) in fields {
            match slot {
                Some(slot) => shader.set_uniform(slot, value),
                None => warn!("uniform {name} wasn't found in the shader"),
            }
        }
    }

    pub fn turn_on<S: ShaderContext + ?Sized>(&mut self, shader: &mut S) {
        self.switch(shader, true);
    }

    pub fn turn_off<S: ShaderContext + ?Sized>(&mut self, shader: &mut S) {
        self.switch(shader, false);
    }

    fn switch<S: ShaderContext + ?Sized>(&mut self, shader: &mut S, on: bool) {
        self.on = on;
        if let Some(slot) = self.on_slot {
            shader.set_uniform(slot, on.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderProgram;

    fn standard_light() -> (Light, ShaderProgram) {
        let program = ShaderProgram::standard();
        let light = Light::from_config(&LightConfig::default(), program.interface());
        (light, program)
    }

    #[test]
    fn config_defaults_match_viewer() {
        let (light, _) = standard_light();
        assert_eq!(light.position(), Vec3::new(0.0, 200.0, 100.0));
        assert_eq!(light.color(), Vec3::splat(0.7));
        assert_eq!(light.ambient(), 0.4);
        assert!(light.is_fixed());
        assert!(light.is_enabled());
    }

    #[test]
    fn missing_on_slot_means_disabled() {
        let mut light = Light::new();
        light.enable(None);
        assert!(!light.is_enabled());
    }

    #[test]
    fn sync_pushes_every_field() {
        let (light, mut program) = standard_light();
        light.sync_to_shader(&mut program);
        assert_eq!(program.uniform_value("light_on"), Some(UniformValue::Bool(true)));
        assert_eq!(
            program.uniform_value("light_position"),
            Some(UniformValue::Vec3(Vec3::new(0.0, 200.0, 100.0)))
        );
        assert_eq!(program.uniform_value("light_ambient"), Some(UniformValue::Float(0.4)));
        assert_eq!(program.uniform_value("light_fixed"), Some(UniformValue::Bool(true)));
    }

    #[test]
    fn disabled_light_pushes_nothing() {
        let (mut light, mut program) = standard_light();
        light.disable();
        light.sync_to_shader(&mut program);
        assert!(program.uniforms().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn update_keeps_slot() {
        let (mut light, mut program) = standard_light();
        light.update_color(Vec3::new(1.0, 0.0, 0.0));
        light.sync_to_shader(&mut program);
        assert_eq!(
            program.uniform_value("light_color"),
            Some(UniformValue::Vec3(Vec3::X))
        );
    }

    #[test]
    fn missing_field_slot_is_skipped() {
        let mut program = ShaderProgram::standard();
        let mut light = Light::new();
        light
            .set_color(Vec3::ONE, None)
            .enable(program.interface().uniform("light_on"));
        light.sync_to_shader(&mut program);
        assert_eq!(program.uniform_value("light_on"), Some(UniformValue::Bool(true)));
        assert_eq!(program.uniform_value("light_color"), Some(UniformValue::Vec3(Vec3::ZERO)));
        assert_eq!(light.color(), Vec3::ONE);
    }

    #[test]
    fn turn_off_and_on_push_immediately() {
        let (mut light, mut program) = standard_light();
        light.turn_off(&mut program);
        assert_eq!(program.uniform_value("light_on"), Some(UniformValue::Bool(false)));
        assert!(!light.is_enabled());
        light.turn_on(&mut program);
        assert_eq!(program.uniform_value("light_on"), Some(UniformValue::Bool(true)));
        assert!(light.is_enabled());
    }
}
