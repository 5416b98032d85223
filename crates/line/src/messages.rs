use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

use shiftbot_core::domain::preference::{PreferenceStatus, ShiftDate, ShiftPreference};
use shiftbot_core::domain::store::Store;

use crate::commands::PostbackData;

/// Upcoming days offered by the shift menu carousel.
pub const SHIFT_MENU_DAYS: u64 = 7;
/// Messaging API cap on messages per reply or push call.
pub const MAX_MESSAGES_PER_CALL: usize = 5;
const MAX_ACTION_LABEL_CHARS: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Text {
        text: String,
    },
    Flex {
        #[serde(rename = "altText")]
        alt_text: String,
        contents: FlexContainer,
    },
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn flex(alt_text: impl Into<String>, contents: FlexContainer) -> Self {
        Self::Flex { alt_text: alt_text.into(), contents }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Flex { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Postback {
        label: String,
        data: String,
        #[serde(rename = "displayText", skip_serializing_if = "Option::is_none")]
        display_text: Option<String>,
    },
    Message {
        label: String,
        text: String,
    },
    Datetimepicker {
        label: String,
        data: String,
        mode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<String>,
    },
}

impl Action {
    pub fn postback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Postback { label: clip_label(label.into()), data: data.into(), display_text: None }
    }

    pub fn message(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message { label: clip_label(label.into()), text: text.into() }
    }

    pub fn date_picker(label: impl Into<String>, data: impl Into<String>, min: ShiftDate) -> Self {
        Self::Datetimepicker {
            label: clip_label(label.into()),
            data: data.into(),
            mode: "date".to_string(),
            min: Some(min.to_string()),
        }
    }

    pub fn display_text(mut self, value: impl Into<String>) -> Self {
        if let Self::Postback { display_text, .. } = &mut self {
            *display_text = Some(value.into());
        }
        self
    }
}

fn clip_label(label: String) -> String {
    if label.chars().count() <= MAX_ACTION_LABEL_CHARS {
        label
    } else {
        label.chars().take(MAX_ACTION_LABEL_CHARS).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlexContainer {
    Bubble(Bubble),
    Carousel(Carousel),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "bubble")]
pub struct Bubble {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<FlexBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<FlexBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<FlexBox>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "carousel")]
pub struct Carousel {
    pub contents: Vec<Bubble>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxLayout {
    Vertical,
    Horizontal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "box")]
pub struct FlexBox {
    pub layout: BoxLayout,
    pub contents: Vec<FlexComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlexComponent {
    Box(FlexBox),
    Text(FlexText),
    Button(FlexButton),
    Separator(FlexSeparator),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "text")]
pub struct FlexText {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Link,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct FlexButton {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "separator")]
pub struct FlexSeparator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<String>,
}

#[derive(Default)]
pub struct BubbleBuilder {
    bubble: Bubble,
}

impl BubbleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut BoxBuilder),
    {
        self.bubble.header = Some(BoxBuilder::run(build));
        self
    }

    pub fn body<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut BoxBuilder),
    {
        self.bubble.body = Some(BoxBuilder::run(build));
        self
    }

    pub fn footer<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut BoxBuilder),
    {
        self.bubble.footer = Some(BoxBuilder::run(build));
        self
    }

    pub fn build(self) -> Bubble {
        self.bubble
    }
}

pub struct BoxBuilder {
    layout: BoxLayout,
    spacing: Option<String>,
    contents: Vec<FlexComponent>,
}

impl BoxBuilder {
    fn run<F>(build: F) -> FlexBox
    where
        F: FnOnce(&mut BoxBuilder),
    {
        let mut builder =
            BoxBuilder { layout: BoxLayout::Vertical, spacing: Some("sm".into()), contents: vec![] };
        build(&mut builder);
        FlexBox { layout: builder.layout, contents: builder.contents, spacing: builder.spacing }
    }

    pub fn horizontal(&mut self) -> &mut Self {
        self.layout = BoxLayout::Horizontal;
        self
    }

    pub fn title(&mut self, text: impl Into<String>) -> &mut Self {
        self.contents.push(FlexComponent::Text(FlexText {
            text: text.into(),
            weight: Some("bold".into()),
            size: Some("xl".into()),
            wrap: Some(true),
        }));
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.contents.push(FlexComponent::Text(FlexText {
            text: text.into(),
            weight: None,
            size: Some("sm".into()),
            wrap: Some(true),
        }));
        self
    }

    pub fn button(&mut self, action: Action, style: ButtonStyle) -> &mut Self {
        self.contents.push(FlexComponent::Button(FlexButton {
            action,
            style: Some(style),
            height: Some("sm".into()),
        }));
        self
    }

    pub fn separator(&mut self) -> &mut Self {
        self.contents.push(FlexComponent::Separator(FlexSeparator::default()));
        self
    }
}

pub fn processing_ack() -> Message {
    Message::text("処理中です...！")
}

pub fn help() -> Message {
    Message::text("「シフト希望提出」と送るとメニューが出ます！")
}

pub fn onboarding(display_name: &str) -> Message {
    Message::text(format!(
        "{display_name}さん、友だち追加ありがとうございます！\n\
         働いている店舗の店舗コードを送ってください。"
    ))
}

pub fn store_code_not_found(input: &str) -> Message {
    Message::text(format!(
        "店舗コードが見つかりませんでした。\n入力したコード: {input}\nもう一度確認してください！"
    ))
}

pub fn registration_failed() -> Message {
    Message::text("登録に失敗しました。店舗に連絡してください。")
}

pub fn registration_complete() -> Vec<Message> {
    vec![
        Message::text("店舗登録完了しました！"),
        Message::text("これからシフト希望を提出できます。メニューから選んでください！"),
    ]
}

pub fn store_code_prompt() -> Message {
    Message::text("店舗コードがまだ登録されていません。\n店舗から受け取った店舗コードを送ってください！")
}

pub fn change_store_prompt() -> Message {
    Message::text("新しい店舗の店舗コードを送ってください。")
}

pub fn preference_saved(date: ShiftDate, status: PreferenceStatus) -> Message {
    Message::text(format!(
        "{date} の希望を{}で登録しました！\nありがとうございます！",
        status.symbol()
    ))
}

pub fn save_failed() -> Message {
    Message::text("エラー発生！後で試してね")
}

pub fn submission_complete() -> Message {
    Message::text("希望提出完了！店長が調整するね〜")
}

pub fn store_switched(store_name: &str) -> Message {
    Message::text(format!("{store_name}に切り替えました！"))
}

pub fn not_a_member() -> Message {
    Message::text("その店舗には登録されていません。店舗コードを送って登録してください。")
}

pub fn preference_list(store_name: &str, preferences: &[ShiftPreference]) -> Message {
    if preferences.is_empty() {
        return Message::text(format!("{store_name}で提出済みの希望はまだありません。"));
    }

    let lines: Vec<String> = preferences
        .iter()
        .map(|preference| {
            let mut line =
                format!("{} {}", day_label(preference.shift_date), preference.status.symbol());
            if let Some(slot) = preference.time_slot.as_deref() {
                line.push_str(&format!(" ({slot})"));
            }
            line
        })
        .collect();
    Message::text(format!("{store_name}の提出済み希望:\n{}", lines.join("\n")))
}

/// Carousel of one bubble per upcoming day with ◯/△/× buttons, closed by a
/// bubble with a date picker and the "done" button.
pub fn shift_menu(store_name: &str, first_day: NaiveDate) -> Message {
    let mut bubbles = Vec::new();

    for offset in 0..SHIFT_MENU_DAYS {
        let Some(day) = first_day.checked_add_days(Days::new(offset)) else {
            break;
        };
        bubbles.push(day_bubble(ShiftDate(day)));
    }

    let first = ShiftDate(first_day);
    bubbles.push(
        BubbleBuilder::new()
            .body(|body| {
                body.title("シフト希望を提出");
                body.text(format!("{store_name}の希望を選んだら「提出する」を押してください。"));
            })
            .footer(|footer| {
                footer.button(
                    Action::date_picker(
                        "日付を選んで◯",
                        PostbackData::submit_preference(None, PreferenceStatus::Ok),
                        first,
                    ),
                    ButtonStyle::Secondary,
                );
                footer.button(
                    Action::postback("提出する", PostbackData::submit_all())
                        .display_text("提出する"),
                    ButtonStyle::Primary,
                );
            })
            .build(),
    );

    Message::flex("シフト希望提出", FlexContainer::Carousel(Carousel { contents: bubbles }))
}

fn day_bubble(date: ShiftDate) -> Bubble {
    let label = day_label(date);
    let choice = |status: PreferenceStatus, caption: &str| {
        Action::postback(
            format!("{} {caption}", status.symbol()),
            PostbackData::submit_preference(Some(date), status),
        )
        .display_text(format!("{label} {}", status.symbol()))
    };

    BubbleBuilder::new()
        .header(|header| {
            header.title(label.clone());
        })
        .body(|body| {
            body.button(choice(PreferenceStatus::Ok, "出たい"), ButtonStyle::Primary);
            body.button(choice(PreferenceStatus::Maybe, "どちらでも"), ButtonStyle::Secondary);
            body.button(choice(PreferenceStatus::No, "出られない"), ButtonStyle::Secondary);
        })
        .build()
}

pub fn store_picker(stores: &[Store]) -> Message {
    let bubble = BubbleBuilder::new()
        .body(|body| {
            body.title("店舗を切り替え");
            body.separator();
            for store in stores {
                body.button(
                    Action::postback(store.name.clone(), PostbackData::switch_store(&store.id))
                        .display_text(store.name.clone()),
                    ButtonStyle::Secondary,
                );
            }
        })
        .footer(|footer| {
            footer.button(
                Action::postback("別の店舗コードを登録", PostbackData::change_store()),
                ButtonStyle::Link,
            );
        })
        .build();

    Message::flex("店舗を切り替え", FlexContainer::Bubble(bubble))
}

fn day_label(date: ShiftDate) -> String {
    const WEEKDAYS: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];
    let weekday = WEEKDAYS[date.0.weekday().num_days_from_monday() as usize];
    format!("{} ({weekday})", date.0.format("%-m/%-d"))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use shiftbot_core::domain::preference::{PreferenceStatus, ShiftDate};
    use shiftbot_core::domain::store::{Store, StoreCode, StoreId};

    use super::{
        preference_saved, shift_menu, store_code_not_found, store_picker, Action, Message,
        SHIFT_MENU_DAYS,
    };

    fn day(raw: &str) -> NaiveDate {
        ShiftDate::parse(raw).expect("date").0
    }

    #[test]
    fn text_message_serializes_to_wire_shape() {
        let value = serde_json::to_value(Message::text("hi")).expect("serialize");
        assert_eq!(value, json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn not_found_reply_echoes_trimmed_input() {
        let message = store_code_not_found("ZZZZ");
        assert!(message.as_text().expect("text").contains("入力したコード: ZZZZ"));
    }

    #[test]
    fn preference_confirmation_names_date_and_status() {
        let message = preference_saved(ShiftDate::parse("2026-02-10").expect("date"), PreferenceStatus::Ok);
        let text = message.as_text().expect("text");
        assert!(text.contains("2026-02-10"));
        assert!(text.contains('◯'));
    }

    #[test]
    fn shift_menu_offers_every_day_plus_submit_bubble() {
        let value = serde_json::to_value(shift_menu("渋谷店", day("2026-02-09"))).expect("serialize");

        assert_eq!(value["type"], "flex");
        assert_eq!(value["altText"], "シフト希望提出");
        assert_eq!(value["contents"]["type"], "carousel");

        let bubbles = value["contents"]["contents"].as_array().expect("bubbles");
        assert_eq!(bubbles.len() as u64, SHIFT_MENU_DAYS + 1);
        assert_eq!(bubbles[0]["type"], "bubble");
        assert_eq!(bubbles[0]["header"]["type"], "box");
        assert_eq!(bubbles[0]["header"]["contents"][0]["text"], "2/9 (月)");
        assert_eq!(bubbles[1]["header"]["contents"][0]["text"], "2/10 (火)");

        let ok_button = &bubbles[1]["body"]["contents"][0];
        assert_eq!(ok_button["type"], "button");
        assert_eq!(ok_button["action"]["type"], "postback");
        assert_eq!(
            ok_button["action"]["data"],
            "action=submit_preference&date=2026-02-10&status=ok"
        );

        let last = bubbles.last().expect("submit bubble");
        let footer = last["footer"]["contents"].as_array().expect("footer");
        assert_eq!(footer[0]["action"]["type"], "datetimepicker");
        assert_eq!(footer[0]["action"]["min"], "2026-02-09");
        assert_eq!(footer[1]["action"]["data"], "action=submit_all");
    }

    #[test]
    fn store_picker_lists_switch_buttons() {
        let stores = vec![Store {
            id: StoreId::new("store-1"),
            name: "梅田店".into(),
            code: StoreCode::parse("UMEDA-01").expect("code"),
            owner_user_id: None,
            address: None,
        }];

        let value = serde_json::to_value(store_picker(&stores)).expect("serialize");
        assert_eq!(value["contents"]["type"], "bubble");
        let buttons = value["contents"]["body"]["contents"].as_array().expect("body");
        assert_eq!(buttons[2]["action"]["data"], "action=switch_store&store_id=store-1");
    }

    #[test]
    fn long_labels_are_clipped() {
        let Action::Postback { label, .. } = Action::postback("あ".repeat(40), "action=x") else {
            panic!("expected postback");
        };
        assert_eq!(label.chars().count(), 20);
    }
}
