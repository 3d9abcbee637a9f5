//! ADC1 sequence: VREFINT, HV bus voltage (PA4), HV bus current (PA5),
//! LV bus voltage (PA6), then the die temperature when enabled

use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime, Temperature, VrefInt};
use embassy_stm32::{peripherals, Peri};
use energymeter_core::RawSample;
use hal_abstractions::AdcTrigger;

type Adc1 = peripherals::ADC1;

pub struct AdcPeripherals {
    pub adc: Peri<'static, Adc1>,
    pub hv_voltage: Peri<'static, peripherals::PA4>,
    pub hv_current: Peri<'static, peripherals::PA5>,
    pub lv_voltage: Peri<'static, peripherals::PA6>,
}

pub struct Channels {
    adc: Adc<'static, Adc1>,
    vrefint: VrefInt,
    temperature: Option<Temperature>,
    hv_voltage: AnyAdcChannel<Adc1>,
    hv_current: AnyAdcChannel<Adc1>,
    lv_voltage: AnyAdcChannel<Adc1>,
}

impl Channels {
    pub fn new(periph: AdcPeripherals, with_temperature: bool) -> Self {
        let mut adc = Adc::new(periph.adc);
        // Internal channels need ≥10 µs of sampling; 480 cycles covers it at 21 MHz
        adc.set_sample_time(SampleTime::CYCLES480);
        let vrefint = adc.enable_vrefint();
        let temperature = with_temperature.then(|| adc.enable_temperature());

        Self {
            adc,
            vrefint,
            temperature,
            hv_voltage: periph.hv_voltage.degrade_adc(),
            hv_current: periph.hv_current.degrade_adc(),
            lv_voltage: periph.lv_voltage.degrade_adc(),
        }
    }

    /// Convert the whole sequence
    pub fn convert(&mut self) -> RawSample {
        let adc = &mut self.adc;
        RawSample {
            vref: adc.blocking_read(&mut self.vrefint),
            hv_voltage: adc.blocking_read(&mut self.hv_voltage),
            hv_current: adc.blocking_read(&mut self.hv_current),
            lv_voltage: adc.blocking_read(&mut self.lv_voltage),
            temperature: self.temperature.as_mut().map(|t| adc.blocking_read(t)),
        }
    }
}

/// Starts a conversion by spawning the conversion task
pub struct SpawnConversion;

impl AdcTrigger for SpawnConversion {
    fn start_conversion(&mut self) {
        // Still converting: the sample is taken on the next base tick
        if crate::app::convert::spawn().is_err() {
            defmt::trace!("conversion still running");
        }
    }
}
