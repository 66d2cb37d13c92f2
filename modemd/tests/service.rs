use fixture::{FakeModem, Fixture, TARGET, healthy_reply, ok};
use modemd::modem::Modem;
use modemd_dbus::{ModemdError, ModemdT};
use std::time::Duration;
use tokio::time::Instant;


fn attach_modem(fx: &Fixture, at_ready: bool) {
    let mut modem = Modem::new(&fx.settings.modems[0], TARGET);
    modem.at_ready = at_ready;
    fx.state.write(|s| s.modem = Some(modem)).unwrap();
}

#[tokio::test(start_paused = true)]
async fn it_refuses_at_commands_without_a_ready_modem() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();

    // Act
    let without_modem = fx.service.run_at_command("AT+CSQ".into()).await;
    attach_modem(&fx, false);
    let not_ready = fx.service.set_apn("internet".into()).await;

    // Assert
    assert!(matches!(without_modem, Err(ModemdError::NotReady(_))));
    assert!(matches!(not_ready, Err(ModemdError::NotReady(_))));
    assert_eq!(fx.modem.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn it_runs_raw_at_commands() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();
    attach_modem(&fx, true);

    // Act
    let (transcript, text) = fx.service.run_at_command("AT+CSQ".into()).await.unwrap();

    // Assert
    assert_eq!(transcript, "+CSQ: 18,99\nOK");
    assert_eq!(text, "+CSQ: 18,99");
}

#[tokio::test(start_paused = true)]
async fn it_reports_modem_errors_from_raw_at_commands() {
    // Arrange
    let modem = FakeModem::new(|cmd| match cmd {
        "AT+BOGUS" => Some("\r\nERROR\r\n".into()),
        other => healthy_reply(other),
    });
    let fx = Fixture::builder().modem(modem).lifecycle(false).spawn();
    attach_modem(&fx, true);

    // Act
    let err = fx.service.run_at_command("AT+BOGUS".into()).await;

    // Assert
    assert!(matches!(err, Err(ModemdError::AtCommand(_))));
}

#[tokio::test(start_paused = true)]
async fn it_sets_the_apn_and_reads_it_back() {
    // Arrange
    let mut apn = String::from("internet");
    let modem = FakeModem::new(move |cmd| {
        if let Some(new) = cmd
            .strip_prefix("AT+CGDCONT=1,\"IP\",\"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            apn = new.to_string();
            return ok("");
        }
        match cmd {
            "AT+CGDCONT?" => ok(&format!("+CGDCONT: 1,\"IP\",\"{apn}\",\"0.0.0.0\",0,0")),
            other => healthy_reply(other),
        }
    });
    let fx = Fixture::builder().modem(modem).lifecycle(false).spawn();
    attach_modem(&fx, true);

    // Act
    fx.service.set_apn("vodafone".into()).await.unwrap();
    let status = fx.service.get_status().await.unwrap();

    // Assert
    assert_eq!(fx.modem.count("AT+CGDCONT=1,\"IP\",\"vodafone\""), 1);
    assert_eq!(status.apn.as_deref(), Some("vodafone"));
}

#[tokio::test(start_paused = true)]
async fn it_rejects_invalid_arguments() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();
    attach_modem(&fx, true);

    // Act
    let apn = fx.service.set_apn("bad\"apn".into()).await;
    let empty_apn = fx.service.set_apn(String::new()).await;
    let minutes = fx.service.stay_on_for(-1).await;

    // Assert
    assert!(matches!(apn, Err(ModemdError::InvalidArgs(_))));
    assert!(matches!(empty_apn, Err(ModemdError::InvalidArgs(_))));
    assert!(matches!(minutes, Err(ModemdError::InvalidArgs(_))));
    assert_eq!(fx.read(|s| s.stay_on_until), None);
    assert_eq!(fx.modem.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn it_records_stay_on_and_stay_off_requests() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();
    fx.state
        .write(|s| {
            s.failed_to_find_modem = true;
            s.failed_to_find_sim_card = true;
        })
        .unwrap();

    // Act
    fx.service.stay_on().await.unwrap();
    fx.service.stay_off_for(10).await.unwrap();

    // Assert
    assert!(fx.read(|s| s.last_on_request.is_some()));
    let stay_off = fx.read(|s| s.stay_off_until).unwrap();
    let remaining = stay_off - tokio::time::Instant::now();
    assert_eq!(remaining, Duration::from_secs(10 * 60));
    assert!(!fx.read(|s| s.failed_to_find_modem));
    assert!(!fx.read(|s| s.failed_to_find_sim_card));
}

#[tokio::test(start_paused = true)]
async fn it_reports_base_status_without_a_modem() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();

    // Act
    let status = fx.service.get_status().await.unwrap();

    // Assert
    assert!(!status.powered);
    assert!(!status.failed_to_find_modem);
    assert!(status.modem.is_none());
    assert!(status.signal.is_none());
    assert!(status.sim_card.is_none());
    assert!(status.apn.is_none());
    assert!(!status.timestamp.is_empty());
}

#[tokio::test(start_paused = true)]
async fn it_reports_full_status_for_a_ready_modem() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();
    attach_modem(&fx, true);

    // Act
    let status = fx.service.get_status().await.unwrap();

    // Assert
    let modem = status.modem.unwrap();
    assert_eq!(modem.vendor_product, "1e0e:9018");
    assert_eq!(modem.usb_id, "1e0e:9018");
    assert_eq!(modem.default_route, "true");
    assert_eq!(modem.manufacturer, "SIMCOM INCORPORATED");
    assert_eq!(modem.model, "LE20B04SIM7600M22");
    assert_eq!(modem.voltage, "3.305");
    assert_eq!(modem.temp, "32");
    let signal = status.signal.unwrap();
    assert_eq!(signal.strength, "18");
    assert_eq!(signal.status, "good");
    assert_eq!(signal.band, "EUTRAN-BAND3");
    assert_eq!(signal.access_technology, "4G");
    let sim = status.sim_card.unwrap();
    assert_eq!(sim.status, "READY");
    assert_eq!(sim.iccid, "8964050087217203420");
    assert_eq!(sim.provider, "Spark NZ");
    assert_eq!(status.apn.as_deref(), Some("internet"));
}

#[tokio::test(start_paused = true)]
async fn it_marks_modem_readings_unavailable_before_at_is_ready() {
    // Arrange
    let fx = Fixture::builder().lifecycle(false).spawn();
    attach_modem(&fx, false);

    // Act
    let status = fx.service.get_status().await.unwrap();

    // Assert
    let modem = status.modem.unwrap();
    assert!(!modem.at_ready);
    assert_eq!(modem.sim_status, "finding");
    assert_eq!(modem.default_route, "true");
    assert!(modem.manufacturer.starts_with("unavailable: "));
    let signal = status.signal.unwrap();
    assert!(signal.strength.starts_with("unavailable: "));
    assert!(signal.band.starts_with("unavailable: "));
    let sim = status.sim_card.unwrap();
    assert!(sim.iccid.starts_with("unavailable: "));
    assert!(status.apn.unwrap().starts_with("unavailable: "));
    assert_eq!(fx.modem.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn it_answers_status_quickly_when_the_modem_stops_responding() {
    // Arrange
    let modem = FakeModem::new(|cmd| match cmd {
        "ATE0" => ok(""),
        _ => None,
    });
    let fx = Fixture::builder().modem(modem).lifecycle(false).spawn();
    attach_modem(&fx, true);
    let start = Instant::now();

    // Act
    let status = fx.service.get_status().await.unwrap();

    // Assert
    assert!(start.elapsed() < Duration::from_secs(5));
    let queries: Vec<_> = fx
        .modem
        .received()
        .into_iter()
        .filter(|cmd| cmd != "ATE0")
        .collect();
    assert_eq!(queries, ["AT+CGMI"]);
    let modem = status.modem.unwrap();
    assert_eq!(modem.default_route, "true");
    assert!(modem.manufacturer.starts_with("unavailable: "));
    assert_eq!(modem.temp, "unavailable: modem not responding");
    assert_eq!(
        status.signal.unwrap().strength,
        "unavailable: modem not responding"
    );
    assert_eq!(status.apn.as_deref(), Some("unavailable: modem not responding"));
}
