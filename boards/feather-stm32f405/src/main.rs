#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod adc;
mod fault;
mod flash;
mod rtc;
mod sdcard;
mod usb;

stm32_tim2_monotonic!(Mono, 1_000_000);

/// Milliseconds since `Mono::start`
fn uptime_ms() -> u64 {
    Mono::now().duration_since_epoch().to_millis()
}

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use defmt::{error, info, warn};
    use embassy_futures::join::join;
    use embassy_stm32::flash::Flash;
    use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{mux, Hse, HseMode, LsConfig, LseConfig, LseMode};
    use embassy_stm32::rtc::{Rtc, RtcConfig};
    use embassy_stm32::time::Hertz;
    use embedded_io_async::Write;
    use energymeter_core::config::{CalibrationConfig, TickConfig};
    use energymeter_core::{
        Acquisition, DeviceState, HostProtocol, IdentityStore, LogSession, TickScheduler,
        XorShift32,
    };
    use hal_abstractions::{Clock, DateTime};
    use static_cell::StaticCell;

    use adc::{AdcPeripherals, Channels, SpawnConversion};
    use flash::{IdentityFlash, IDENTITY_SECTOR};
    use rtc::RtcClock;
    use sdcard::{SdPeripherals, SdStorage};
    use usb::{UsbError, UsbPeripherals};

    /// Peripherals both operating modes log through
    pub struct LoggerPeripherals {
        sd: SdPeripherals,
        flash: embassy_stm32::Peri<'static, peripherals::FLASH>,
    }

    fn identity_store(
        flash: embassy_stm32::Peri<'static, peripherals::FLASH>,
    ) -> IdentityStore<IdentityFlash> {
        IdentityStore::new(IdentityFlash::new(Flash::new_blocking(flash)), IDENTITY_SECTOR)
    }

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
        scheduler: TickScheduler<XorShift32>,
        channels: Channels,
        calibration: CalibrationConfig,
        tick_state: &'static DeviceState,
        sample_state: &'static DeviceState,
        main_state: &'static DeviceState,
        /// Present in acquisition mode only
        acquisition: Option<LoggerPeripherals>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Energy meter data logger starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE, 32.768 kHz LSE (PC14/PC15)
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz (USB OTG FS)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;

        config.rcc.ls = LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz(32_768),
                mode: LseMode::Oscillator(embassy_stm32::rcc::LseDrive::MediumHigh),
            }),
        };

        let p = embassy_stm32::init(config);

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        rtc::initialize_rtc(Rtc::new(p.RTC, RtcConfig::default()));

        static STATE: StaticCell<DeviceState> = StaticCell::new();
        let state: &'static DeviceState = STATE.init(DeviceState::new());
        fault::check_previous_run(&state.errors);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let seed = embassy_stm32::uid::uid()
            .chunks_exact(4)
            .fold(0u32, |acc, w| acc ^ u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        let scheduler = match TickScheduler::new(TickConfig::default(), XorShift32::new(seed)) {
            Ok(scheduler) => scheduler,
            Err(e) => defmt::panic!("invalid tick configuration: {}", e),
        };

        let calibration = CalibrationConfig::default();
        let channels = Channels::new(
            AdcPeripherals {
                adc: p.ADC1,
                hv_voltage: p.PA4,
                hv_current: p.PA5,
                lv_voltage: p.PA6,
            },
            calibration.temperature,
        );

        let logger = LoggerPeripherals {
            sd: SdPeripherals {
                spi: p.SPI2,
                sck: p.PB13,
                mosi: p.PB15,
                miso: p.PB14,
                cs: p.PC6,
            },
            flash: p.FLASH,
        };

        // USB VBUS present at reset selects host mode
        let host_mode = Input::new(p.PA9, Pull::Down).is_high();

        let acquisition = if host_mode {
            info!("VBUS present: host mode");
            let usb = UsbPeripherals {
                otg: p.USB_OTG_FS,
                dp: p.PA12,
                dm: p.PA11,
            };
            if host::spawn(logger, usb).is_err() {
                error!("failed to spawn host task");
            }
            None
        } else {
            info!("acquisition mode");
            if tick::spawn().is_err() {
                error!("failed to spawn tick task");
            }
            Some(logger)
        };

        (
            Shared {},
            Local {
                led,
                scheduler,
                channels,
                calibration,
                tick_state: state,
                sample_state: state,
                main_state: state,
                acquisition,
            },
        )
    }

    /// Base tick: raises BASE/JITTER/CYCLE and drives the fault indicator
    #[task(priority = 3, local = [led, scheduler, tick_state])]
    async fn tick(cx: tick::Context) {
        let state = *cx.local.tick_state;
        let period_ms = cx.local.scheduler.config().base_period_ms;
        info!("tick scheduler started, {} ms base period", period_ms);
        let period = (period_ms as u64).millis();

        let mut next = Mono::now();
        loop {
            next += period;
            Mono::delay_until(next).await;
            if cx.local.scheduler.on_interrupt(&state.ticks, &state.errors) {
                cx.local.led.toggle();
            }
        }
    }

    /// Conversion-complete context: calibrate and publish one sample
    #[task(priority = 2, local = [channels, calibration, sample_state])]
    async fn convert(cx: convert::Context) {
        let raw = cx.local.channels.convert();
        cx.local
            .sample_state
            .on_conversion_complete(&raw, cx.local.calibration);
    }

    /// Host mode: serve the command protocol over USB CDC-ACM
    #[task(priority = 1)]
    async fn host(_cx: host::Context, logger: LoggerPeripherals, usb: UsbPeripherals) {
        let (mut device, mut sender, mut receiver) = usb::init(usb);

        let identity = identity_store(logger.flash);
        let mut protocol = HostProtocol::new(SdStorage::new(logger.sd), identity, RtcClock);
        if let Err(e) = protocol.mount() {
            warn!("log volume unavailable: {}", e);
        }

        let serve = async {
            loop {
                receiver.wait_connection().await;
                info!("host connected");
                loop {
                    let message = match receiver.read_message().await {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("receive failed: {}", e);
                            break;
                        }
                    };
                    let response = match protocol.handle(&message, &mut sender).await {
                        Ok(()) => sender.flush().await,
                        Err(e) => Err(e),
                    };
                    match response {
                        Ok(()) => {}
                        Err(UsbError::Disconnected) => break,
                        Err(e) => warn!("response aborted: {}", e),
                    }
                }
                info!("host disconnected");
            }
        };

        join(device.run(), serve).await;
    }

    /// Acquisition mode main loop; host mode sleeps here between interrupts
    #[idle(local = [acquisition, main_state])]
    fn idle(cx: idle::Context) -> ! {
        let state = *cx.local.main_state;
        let Some(logger) = cx.local.acquisition.take() else {
            loop {
                cortex_m::asm::wfi();
            }
        };

        let mut identity = identity_store(logger.flash);
        let device_id = identity.resolve(&state.errors);

        let boot = match RtcClock.now() {
            Ok(now) => now,
            Err(e) => {
                warn!("RTC unavailable ({}), timestamps start at 2000-01-01", e);
                DateTime::EPOCH
            }
        };

        let session = LogSession::open(
            SdStorage::new(logger.sd),
            device_id,
            &boot,
            uptime_ms(),
            &state.errors,
        );
        info!("logging to {}", session.name());

        let mut acquisition = Acquisition::new(state, session, SpawnConversion);
        loop {
            acquisition.poll(uptime_ms());
        }
    }
}
