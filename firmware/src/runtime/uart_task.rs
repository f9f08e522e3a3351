use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use signal_core::protocol::{FrameReceiver, MAX_FRAME, reject};

use super::FrameQueue;

const COMMAND_UART_BUFFER_SIZE: usize = MAX_FRAME * 2;
const COMMAND_UART_BAUD: u32 = 9_600;

static mut UART_TX_BUFFER: [u8; COMMAND_UART_BUFFER_SIZE] = [0; COMMAND_UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; COMMAND_UART_BUFFER_SIZE] = [0; COMMAND_UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// Configuration link: framed requests in, ACK/NACK/read responses out.
///
/// Framing errors are answered here; well-formed frames go to the control
/// loop, which owns the store and the clock.
#[embassy_executor::task]
pub async fn run(
    requests: &'static FrameQueue,
    responses: &'static FrameQueue,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = COMMAND_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize command UART")
    };

    let (mut uart_tx, mut uart_rx) = uart.split();

    let transmit = async move {
        loop {
            let frame = responses.receive().await;
            let encoded = frame.encode();
            if uart_tx.write_all(&encoded).await.is_err() {
                defmt::warn!("uart: write error, dropping {=u8:#x}", frame.command);
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
            if uart_tx.flush().await.is_err() {
                defmt::warn!("uart: flush error");
            }
        }
    };

    let receive = async move {
        let mut receiver = FrameReceiver::new();
        let mut ingress = [0u8; MAX_FRAME];
        loop {
            let count = match uart_rx.read(&mut ingress).await {
                Ok(count) => count,
                Err(_) => {
                    defmt::warn!("uart: read error");
                    receiver.reset();
                    Timer::after(Duration::from_millis(5)).await;
                    continue;
                }
            };
            for byte in &ingress[..count] {
                match receiver.push(*byte) {
                    Some(Ok(frame)) => requests.send(frame).await,
                    Some(Err(error)) => {
                        defmt::warn!("uart: rejected frame: {}", error);
                        if let Some(nack) = reject(error) {
                            responses.send(nack).await;
                        }
                    }
                    None => {}
                }
            }
        }
    };

    join(transmit, receive).await;
    loop {
        core::future::pending::<()>().await;
    }
}
