//! # Camera Terminal and Processing Unit Controls
//!
//! Controls are looked up by `(entity kind, selector)`. The lookup result
//! fixes the protocol side (which control, how wide its value is), while the
//! values returned to the host come from an overridable [`ControlPolicy`].
//!
//! ```text
//!  selector ──► Control ──► ControlSetting ──► (value bytes | capability byte)
//!   (wire)     (protocol)     (policy)
//! ```

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::protocol::{Request, INFO_GET_SET};

/// Camera terminal control selectors
pub const CT_AE_MODE_CONTROL: u8 = 0x02;
pub const CT_EXPOSURE_TIME_ABSOLUTE_CONTROL: u8 = 0x04;
pub const CT_FOCUS_ABSOLUTE_CONTROL: u8 = 0x06;
pub const CT_FOCUS_AUTO_CONTROL: u8 = 0x08;
pub const CT_ZOOM_ABSOLUTE_CONTROL: u8 = 0x0B;
pub const CT_ROLL_ABSOLUTE_CONTROL: u8 = 0x0F;

/// Processing unit control selectors
pub const PU_BACKLIGHT_COMPENSATION_CONTROL: u8 = 0x01;
pub const PU_BRIGHTNESS_CONTROL: u8 = 0x02;
pub const PU_CONTRAST_CONTROL: u8 = 0x03;
pub const PU_GAIN_CONTROL: u8 = 0x04;
pub const PU_HUE_CONTROL: u8 = 0x06;
pub const PU_SATURATION_CONTROL: u8 = 0x07;
pub const PU_SHARPNESS_CONTROL: u8 = 0x08;
pub const PU_WHITE_BALANCE_TEMPERATURE_CONTROL: u8 = 0x0A;
pub const PU_WHITE_BALANCE_TEMPERATURE_AUTO_CONTROL: u8 = 0x0B;

/// Little-endian control value, at most 4 bytes wide
pub type ControlValue = Vec<u8, 4>;

/// Implemented controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Control {
    AutoExposureMode,
    ExposureTimeAbsolute,
    FocusAbsolute,
    FocusAuto,
    ZoomAbsolute,
    RollAbsolute,
    BacklightCompensation,
    Brightness,
    Contrast,
    Gain,
    Hue,
    Saturation,
    Sharpness,
    WhiteBalanceTemperature,
    WhiteBalanceTemperatureAuto,
}

const CAMERA_CONTROLS: [(u8, Control); 6] = [
    (CT_AE_MODE_CONTROL, Control::AutoExposureMode),
    (CT_EXPOSURE_TIME_ABSOLUTE_CONTROL, Control::ExposureTimeAbsolute),
    (CT_FOCUS_ABSOLUTE_CONTROL, Control::FocusAbsolute),
    (CT_FOCUS_AUTO_CONTROL, Control::FocusAuto),
    (CT_ZOOM_ABSOLUTE_CONTROL, Control::ZoomAbsolute),
    (CT_ROLL_ABSOLUTE_CONTROL, Control::RollAbsolute),
];

const PROCESSING_CONTROLS: [(u8, Control); 9] = [
    (PU_BACKLIGHT_COMPENSATION_CONTROL, Control::BacklightCompensation),
    (PU_BRIGHTNESS_CONTROL, Control::Brightness),
    (PU_CONTRAST_CONTROL, Control::Contrast),
    (PU_GAIN_CONTROL, Control::Gain),
    (PU_HUE_CONTROL, Control::Hue),
    (PU_SATURATION_CONTROL, Control::Saturation),
    (PU_SHARPNESS_CONTROL, Control::Sharpness),
    (PU_WHITE_BALANCE_TEMPERATURE_CONTROL, Control::WhiteBalanceTemperature),
    (PU_WHITE_BALANCE_TEMPERATURE_AUTO_CONTROL, Control::WhiteBalanceTemperatureAuto),
];

fn find(table: &[(u8, Control)], selector: u8) -> Option<Control> {
    table.iter().find(|(sel, _)| *sel == selector).map(|(_, control)| *control)
}

impl Control {
    /// Camera terminal control for a selector
    pub fn camera(selector: u8) -> Option<Self> {
        find(&CAMERA_CONTROLS, selector)
    }

    /// Processing unit control for a selector
    pub fn processing(selector: u8) -> Option<Self> {
        find(&PROCESSING_CONTROLS, selector)
    }

    /// Width of the control's value on the wire
    pub const fn width(self) -> usize {
        match self {
            Control::ExposureTimeAbsolute => 4,
            Control::AutoExposureMode | Control::WhiteBalanceTemperatureAuto => 1,
            _ => 2,
        }
    }
}

/// Canned answers for one control
///
/// A `None` field means the matching GET request is not supported and
/// stalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct ControlSetting {
    pub cur: Option<u32>,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub res: Option<u32>,
    pub def: Option<u32>,
    /// GET_INFO capability bitmap
    pub info: Option<u8>,
    /// SET_CUR is acknowledged (the value is not stored)
    pub writable: bool,
}

impl ControlSetting {
    /// Full GET set with a GET/SET capability bitmap
    pub const fn range(cur: u32, min: u32, max: u32, res: u32, def: u32) -> Self {
        Self {
            cur: Some(cur),
            min: Some(min),
            max: Some(max),
            res: Some(res),
            def: Some(def),
            info: Some(INFO_GET_SET),
            writable: false,
        }
    }

    /// Limits and default only, no GET_CUR
    pub const fn limits(min: u32, max: u32, res: u32, def: u32) -> Self {
        Self { cur: None, ..Self::range(0, min, max, res, def) }
    }

    /// GET_CUR and GET_INFO only
    pub const fn current(cur: u32) -> Self {
        Self {
            cur: Some(cur),
            min: None,
            max: None,
            res: None,
            def: None,
            info: Some(INFO_GET_SET),
            writable: false,
        }
    }

    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Answer `request` for `control`
    ///
    /// Returns `None` when the request is not supported; a supported
    /// SET_CUR yields an empty value.
    pub fn respond(&self, control: Control, request: Request) -> Option<ControlValue> {
        let value = match request {
            Request::SetCur => return self.writable.then(ControlValue::new),
            Request::GetInfo => return self.info.and_then(|info| Vec::from_slice(&[info]).ok()),
            Request::GetCur => self.cur,
            Request::GetMin => self.min,
            Request::GetMax => self.max,
            Request::GetRes => self.res,
            Request::GetDef => self.def,
            Request::GetLen => None,
        }?;
        Vec::from_slice(&value.to_le_bytes()[..control.width()]).ok()
    }
}

/// Values reported for every implemented control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct ControlPolicy {
    pub ae_mode: ControlSetting,
    /// 100 µs units
    pub exposure_time_absolute: ControlSetting,
    pub focus_absolute: ControlSetting,
    pub focus_auto: ControlSetting,
    pub zoom_absolute: ControlSetting,
    pub roll_absolute: ControlSetting,
    pub backlight_compensation: ControlSetting,
    pub brightness: ControlSetting,
    pub contrast: ControlSetting,
    pub gain: ControlSetting,
    pub hue: ControlSetting,
    pub saturation: ControlSetting,
    pub sharpness: ControlSetting,
    /// Kelvin / 10
    pub white_balance_temperature: ControlSetting,
    pub white_balance_temperature_auto: ControlSetting,
}

impl ControlPolicy {
    pub fn setting(&self, control: Control) -> &ControlSetting {
        match control {
            Control::AutoExposureMode => &self.ae_mode,
            Control::ExposureTimeAbsolute => &self.exposure_time_absolute,
            Control::FocusAbsolute => &self.focus_absolute,
            Control::FocusAuto => &self.focus_auto,
            Control::ZoomAbsolute => &self.zoom_absolute,
            Control::RollAbsolute => &self.roll_absolute,
            Control::BacklightCompensation => &self.backlight_compensation,
            Control::Brightness => &self.brightness,
            Control::Contrast => &self.contrast,
            Control::Gain => &self.gain,
            Control::Hue => &self.hue,
            Control::Saturation => &self.saturation,
            Control::Sharpness => &self.sharpness,
            Control::WhiteBalanceTemperature => &self.white_balance_temperature,
            Control::WhiteBalanceTemperatureAuto => &self.white_balance_temperature_auto,
        }
    }

    pub fn setting_mut(&mut self, control: Control) -> &mut ControlSetting {
        match control {
            Control::AutoExposureMode => &mut self.ae_mode,
            Control::ExposureTimeAbsolute => &mut self.exposure_time_absolute,
            Control::FocusAbsolute => &mut self.focus_absolute,
            Control::FocusAuto => &mut self.focus_auto,
            Control::ZoomAbsolute => &mut self.zoom_absolute,
            Control::RollAbsolute => &mut self.roll_absolute,
            Control::BacklightCompensation => &mut self.backlight_compensation,
            Control::Brightness => &mut self.brightness,
            Control::Contrast => &mut self.contrast,
            Control::Gain => &mut self.gain,
            Control::Hue => &mut self.hue,
            Control::Saturation => &mut self.saturation,
            Control::Sharpness => &mut self.sharpness,
            Control::WhiteBalanceTemperature => &mut self.white_balance_temperature,
            Control::WhiteBalanceTemperatureAuto => &mut self.white_balance_temperature_auto,
        }
    }
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self {
            ae_mode: ControlSetting::current(0x08),
            exposure_time_absolute: ControlSetting::range(2500, 5, 2500, 5, 2500),
            focus_absolute: ControlSetting::range(0x80, 0, 0xff, 1, 0x80),
            focus_auto: ControlSetting::current(0),
            zoom_absolute: ControlSetting::range(0x64, 0x64, 0xc8, 1, 0x64),
            roll_absolute: ControlSetting::range(0, 0, 0xff, 1, 0),
            backlight_compensation: ControlSetting::range(4, 0, 8, 1, 4),
            brightness: ControlSetting::range(0x80, 1, 0xff, 1, 0x80).writable(),
            contrast: ControlSetting::range(0x80, 1, 0xff, 1, 0x80),
            gain: ControlSetting::limits(0, 255, 1, 255),
            hue: ControlSetting::range(0x80, 1, 0xff, 1, 0x80),
            saturation: ControlSetting::limits(1, 0xff, 1, 0x80),
            sharpness: ControlSetting::limits(1, 0xff, 1, 0x80),
            white_balance_temperature: ControlSetting::range(417, 300, 600, 1, 417),
            white_balance_temperature_auto: ControlSetting::current(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_lookup() {
        assert_eq!(Control::camera(0x04), Some(Control::ExposureTimeAbsolute));
        assert_eq!(Control::processing(0x0B), Some(Control::WhiteBalanceTemperatureAuto));
        // Same selector value, different entity kind
        assert_eq!(Control::camera(0x0B), Some(Control::ZoomAbsolute));
        assert_eq!(Control::processing(0x05), None);
        assert_eq!(Control::camera(0x7F), None);
    }

    #[test]
    fn test_exposure_is_four_bytes() {
        let policy = ControlPolicy::default();
        let value = policy
            .setting(Control::ExposureTimeAbsolute)
            .respond(Control::ExposureTimeAbsolute, Request::GetCur)
            .unwrap();
        assert_eq!(value.as_slice(), &2500u32.to_le_bytes());
    }

    #[test]
    fn test_unsupported_variants() {
        let policy = ControlPolicy::default();
        let gain = policy.setting(Control::Gain);
        assert!(gain.respond(Control::Gain, Request::GetCur).is_none());
        assert_eq!(gain.respond(Control::Gain, Request::GetDef).unwrap().as_slice(), &[255, 0]);

        let ae = policy.setting(Control::AutoExposureMode);
        assert_eq!(ae.respond(Control::AutoExposureMode, Request::GetCur).unwrap().as_slice(), &[0x08]);
        assert!(ae.respond(Control::AutoExposureMode, Request::GetMin).is_none());
        assert!(ae.respond(Control::AutoExposureMode, Request::SetCur).is_none());
    }

    #[test]
    fn test_brightness_accepts_set() {
        let policy = ControlPolicy::default();
        let brightness = policy.setting(Control::Brightness);
        let ack = brightness.respond(Control::Brightness, Request::SetCur).unwrap();
        assert!(ack.is_empty());
        assert!(policy.setting(Control::Contrast).respond(Control::Contrast, Request::SetCur).is_none());
    }

    #[test]
    fn test_info_is_get_set_for_every_control() {
        let policy = ControlPolicy::default();
        for (_, control) in CAMERA_CONTROLS.iter().chain(PROCESSING_CONTROLS.iter()) {
            let info = policy.setting(*control).respond(*control, Request::GetInfo).unwrap();
            assert_eq!(info.as_slice(), &[INFO_GET_SET], "{:?}", control);
        }
    }

    #[test]
    fn test_policy_override() {
        let mut policy = ControlPolicy::default();
        *policy.setting_mut(Control::Brightness) = ControlSetting::range(10, 0, 20, 2, 10);
        let value = policy.setting(Control::Brightness).respond(Control::Brightness, Request::GetMax).unwrap();
        assert_eq!(value.as_slice(), &[20, 0]);
    }
}
