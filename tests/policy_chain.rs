//! Policy chain integration tests.
//!
//! Messages go through `MessageHandler::handle_event` exactly as the gateway
//! delivers them, with in-memory platform and backend doubles.

mod common;

use common::*;
use larkgpt::handlers::{run_chain, MessageContext, Policy};
use larkgpt::providers::{ChatMessage, ImageResolution};
use larkgpt::session::Mode;
use serde_json::json;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn duplicate_delivery_is_processed_once() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    let ev = p2p_text("om_dup", "hello");

    h.handler.handle_event(ev.clone()).await;
    h.handler.handle_event(ev).await;

    assert_eq!(h.backend.chat_calls().len(), 1);
    assert_eq!(h.platform.cards().len(), 1);
}

#[tokio::test]
async fn plain_chat_replies_with_answer_and_records_exchange() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(p2p_text("om_1", "hi there")).await;

    let cards = h.platform.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(card_body(&cards[0]).as_deref(), Some("pong"));
    assert_eq!(card_title(&cards[0]).as_deref(), Some("👻️ Started New Topic"));

    let history = h.sessions().history("om_1");
    assert_eq!(history.len(), 3);
    assert!(history[0].is_system());
    assert_eq!(history[1], ChatMessage::user("hi there"));
    assert_eq!(history[2], ChatMessage::assistant("pong"));
}

#[tokio::test]
async fn system_prompt_is_injected_once_per_session() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(p2p_text("om_root", "first")).await;
    h.handler
        .handle_event(p2p_reply("om_second", "om_root", "second"))
        .await;

    let calls = h.backend.chat_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].len(), 2);
    assert_eq!(calls[1].len(), 4);
    assert_eq!(calls[1].iter().filter(|m| m.is_system()).count(), 1);
    assert_eq!(calls[1][3], ChatMessage::user("second"));

    let second_card = &h.platform.cards()[1];
    assert_eq!(card_title(second_card).as_deref(), Some("🔃️ Contextual Topic"));
}

#[tokio::test]
async fn plain_chat_failure_reports_error_and_keeps_history_clean() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    *h.backend.chat_reply.lock().unwrap() = Err("quota exhausted".into());

    h.handler.handle_event(p2p_text("om_err", "hello")).await;

    let replies = h.platform.replies();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("The message bot encountered an error"));
    assert!(replies[0].contains("quota exhausted"));
    let history = h.sessions().history("om_err");
    assert!(history.iter().all(ChatMessage::is_system));
}

#[tokio::test]
async fn clear_command_matches_trimmed_keywords_only() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(p2p_text("om_a", " clear ")).await;
    h.handler.handle_event(p2p_text("om_b", "/clear")).await;
    h.handler.handle_event(p2p_text("om_c", "reset")).await;
    h.handler.handle_event(p2p_text("om_d", "clear everything")).await;

    let titles: Vec<_> = h.platform.cards().iter().filter_map(card_title).collect();
    assert_eq!(
        titles,
        vec![
            "🆑 Bot Reminder",
            "🆑 Bot Reminder",
            "👻️ Started New Topic",
            "👻️ Started New Topic",
        ]
    );
    assert_eq!(h.backend.chat_calls().len(), 2);
}

#[tokio::test]
async fn role_play_seeds_system_prompt_and_switches_mode() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler
        .handle_event(p2p_text("om_rp", "/system You are a pirate"))
        .await;

    assert_eq!(h.sessions().mode("om_rp"), Mode::RolePlay);
    assert_eq!(
        h.sessions().history("om_rp"),
        vec![ChatMessage::system("You are a pirate")]
    );
    let cards = h.platform.cards();
    assert_eq!(card_body(&cards[0]).as_deref(), Some("You are a pirate"));
    assert!(h.backend.chat_calls().is_empty());

    h.handler
        .handle_event(p2p_reply("om_rp2", "om_rp", "ahoy?"))
        .await;
    let calls = h.backend.chat_calls();
    assert_eq!(
        calls[0],
        vec![
            ChatMessage::system("You are a pirate"),
            ChatMessage::user("ahoy?")
        ]
    );
}

#[tokio::test]
async fn role_play_keyword_variant_is_accepted() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler
        .handle_event(p2p_text("om_rp", "role play a grumpy cat"))
        .await;

    assert_eq!(
        h.sessions().history("om_rp"),
        vec![ChatMessage::system("a grumpy cat")]
    );
}

#[tokio::test]
async fn group_messages_require_a_single_bot_mention() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(group_text("om_g1", "hello", &[])).await;
    h.handler
        .handle_event(group_text("om_g2", "@_user_1 hello", &["someone"]))
        .await;
    h.handler
        .handle_event(group_text(
            "om_g3",
            "@_user_1 @_user_2 hello",
            &[BOT_NAME, "someone"],
        ))
        .await;
    assert!(h.platform.outbound().is_empty());
    assert!(h.backend.chat_calls().is_empty());

    h.handler
        .handle_event(group_text("om_g4", "@_user_1 hello", &[BOT_NAME]))
        .await;
    let calls = h.backend.chat_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].last(), Some(&ChatMessage::user("hello")));
}

#[tokio::test]
async fn empty_input_prompts_in_chat_without_model_call() {
    for streaming in [false, true] {
        let h = Harness::new(
            test_config(streaming),
            MockPlatform::new(),
            MockBackend::new(StreamScript::Fragments(vec!["unused"])),
        );

        h.handler.handle_event(p2p_text("om_empty", "   ")).await;

        assert_eq!(
            h.platform.outbound(),
            vec![Outbound::Text {
                chat_id: "oc_chat".into(),
                text: "🤖️: What would you like to know?~".into(),
            }]
        );
        assert!(h.backend.chat_calls().is_empty());
        assert!(h.sessions().history("om_empty").is_empty());
    }
}

#[tokio::test]
async fn run_chain_reports_the_halting_policy() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    let mut ctx = MessageContext::new(p2p_text("om_help", "/help"));
    assert_eq!(run_chain(&h.handler, &mut ctx).await, Some(Policy::Help));

    let mut again = MessageContext::new(p2p_text("om_help", "/help"));
    assert_eq!(run_chain(&h.handler, &mut again).await, Some(Policy::Dedup));

    let mut balance = MessageContext::new(p2p_text("om_bal", "balance"));
    assert_eq!(run_chain(&h.handler, &mut balance).await, Some(Policy::Balance));
    assert_eq!(h.platform.cards().len(), 2);
}

#[tokio::test]
async fn unsupported_message_types_are_dropped() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    let ev = event("om_sticker", "", "p2p", "sticker", &json!({"file_key": "f"}), &json!([]));

    h.handler.handle_event(ev).await;

    assert!(h.platform.outbound().is_empty());
}

#[tokio::test]
async fn voice_message_is_transcribed_then_answered() {
    let h = Harness::new(
        test_config(false),
        MockPlatform::with_attachment(b"opus-bytes".to_vec()),
        MockBackend::new(StreamScript::Fragments(vec![])),
    );
    let ev = event(
        "om_voice",
        "",
        "p2p",
        "audio",
        &json!({"file_key": "file_v2_voice", "duration": 1200}),
        &json!([]),
    );

    h.handler.handle_event(ev).await;

    assert_eq!(h.platform.replies(), vec!["🤖️：hello from voice".to_string()]);
    let calls = h.backend.chat_calls();
    assert_eq!(calls[0].last(), Some(&ChatMessage::user("hello from voice")));
}

#[tokio::test]
async fn failed_transcription_halts_the_chain() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    *h.backend.transcript.lock().unwrap() = Err("unsupported codec".into());
    let ev = event(
        "om_voice",
        "",
        "p2p",
        "audio",
        &json!({"file_key": "file_v2_voice"}),
        &json!([]),
    );

    h.handler.handle_event(ev).await;

    let replies = h.platform.replies();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].starts_with("🤖️: Audio conversion failed"));
    assert!(h.backend.chat_calls().is_empty());
}

#[tokio::test]
async fn picture_mode_switch_clears_history_and_generates_images() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(p2p_text("om_root", "hello")).await;
    assert_eq!(h.sessions().history("om_root").len(), 3);

    h.handler
        .handle_event(p2p_reply("om_pic", "om_root", "/picture"))
        .await;
    assert_eq!(h.sessions().mode("om_root"), Mode::PicCreate);
    assert!(h.sessions().history("om_root").is_empty());
    assert_eq!(
        h.sessions().settings("om_root").pic_resolution,
        ImageResolution::R1024
    );

    h.handler
        .handle_event(p2p_reply("om_cat", "om_root", "a cat in a hat"))
        .await;
    assert_eq!(
        h.backend.image_prompts.lock().unwrap().clone(),
        vec!["a cat in a hat".to_string()]
    );
    let last = h.platform.cards().pop().unwrap();
    assert_eq!(last["elements"][0]["img_key"], "img_1");
    assert_eq!(h.backend.chat_calls().len(), 1);
}

#[tokio::test]
async fn image_outside_picture_mode_offers_mode_switch() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    let ev = event("om_img", "", "p2p", "image", &json!({"image_key": "img_in"}), &json!([]));

    h.handler.handle_event(ev).await;

    let cards = h.platform.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(
        card_body(&cards[0]).as_deref(),
        Some("Image received, enter image creation mode?")
    );
    assert_eq!(h.backend.variations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn image_in_picture_mode_is_varied() {
    let h = Harness::new(
        test_config(false),
        MockPlatform::with_attachment(sample_png()),
        MockBackend::new(StreamScript::Fragments(vec![])),
    );
    h.handler.handle_event(p2p_text("om_root", "/picture")).await;

    let ev = event(
        "om_img",
        "om_root",
        "p2p",
        "image",
        &json!({"image_key": "img_in"}),
        &json!([]),
    );
    h.handler.handle_event(ev).await;

    assert_eq!(h.backend.variations.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn vision_mode_requires_an_image() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(p2p_text("om_root", "/vision")).await;
    assert_eq!(h.sessions().mode("om_root"), Mode::Vision);

    h.handler
        .handle_event(p2p_reply("om_txt", "om_root", "what is this?"))
        .await;
    assert_eq!(
        h.platform.replies(),
        vec!["🤖️: Please send an image (or a post containing images) for analysis~".to_string()]
    );
    assert!(h.backend.chat_calls().is_empty());
}

#[tokio::test]
async fn vision_mode_describes_an_image_reply() {
    let h = Harness::new(
        test_config(false),
        MockPlatform::with_attachment(sample_png()),
        MockBackend::new(StreamScript::Fragments(vec![])),
    );
    h.handler.handle_event(p2p_text("om_root", "/vision")).await;

    let ev = event(
        "om_img",
        "om_root",
        "p2p",
        "image",
        &json!({"image_key": "img_in"}),
        &json!([]),
    );
    h.handler.handle_event(ev).await;

    assert_eq!(
        h.backend.vision_calls.lock().unwrap().clone(),
        vec![("Please describe this image in detail.".to_string(), 1)]
    );
    let cards = h.platform.cards();
    assert_eq!(cards.len(), 2);
    assert_eq!(
        card_title(&cards[1]).as_deref(),
        Some("🕵️ Image Analysis Result")
    );
    assert_eq!(
        card_body(&cards[1]).as_deref(),
        Some("1 image(s): Please describe this image in detail.")
    );
    assert!(h.backend.chat_calls().is_empty());
    assert_eq!(h.backend.variations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn post_with_images_outside_vision_mode_offers_vision_mode() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    let content = json!({
        "title": "",
        "content": [
            [{"tag": "img", "image_key": "img_a"}],
            [{"tag": "text", "text": "what is in this picture?"}]
        ]
    });
    let ev = event("om_post", "", "p2p", "post", &content, &json!([]));

    h.handler.handle_event(ev).await;

    let cards = h.platform.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(
        card_body(&cards[0]).as_deref(),
        Some("Image detected, enter image analysis mode?")
    );
    assert_eq!(cards[0]["elements"][2]["actions"][0]["value"]["kind"], "vision_mode");
    assert_eq!(h.sessions().mode("om_post"), Mode::PlainChat);
    assert!(h.backend.vision_calls.lock().unwrap().is_empty());
    assert!(h.backend.chat_calls().is_empty());
}

#[tokio::test]
async fn menu_commands_reply_with_their_cards() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));

    h.handler.handle_event(p2p_text("om_ai", "ai mode")).await;
    h.handler.handle_event(p2p_text("om_roles", "/roles")).await;
    h.handler.handle_event(p2p_text("om_help", "help")).await;

    let cards = h.platform.cards();
    assert_eq!(cards.len(), 3);

    assert_eq!(card_title(&cards[0]).as_deref(), Some("🤖 Divergent Mode Selection"));
    let menu = &cards[0]["elements"][0]["actions"][0];
    assert_eq!(menu["value"]["kind"], "ai_mode_choose");
    assert_eq!(menu["value"]["sessionId"], "om_ai");
    assert_eq!(menu["options"].as_array().unwrap().len(), 4);

    assert_eq!(card_title(&cards[1]).as_deref(), Some("🛖 Please Select Role Category"));
    let menu = &cards[1]["elements"][0]["actions"][0];
    assert_eq!(menu["value"]["kind"], "role_tags_choose");
    let options: Vec<String> = menu["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["value"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(options, h.handler.config().role_tags());
    assert!(!options.is_empty());

    assert_eq!(card_title(&cards[2]).as_deref(), Some("🎒 Need Help?"));
    assert_eq!(cards[2]["elements"][2]["extra"]["value"]["kind"], "clear");

    assert!(h.backend.chat_calls().is_empty());
}

#[tokio::test]
async fn long_one_shot_answer_continues_in_extra_cards() {
    let h = Harness::plain(StreamScript::Fragments(vec![]));
    let answer = "z".repeat(8_000 + 1_500);
    *h.backend.chat_reply.lock().unwrap() = Ok(answer.clone());

    h.handler.handle_event(p2p_text("om_long", "tell me everything")).await;

    let cards = h.platform.cards();
    assert_eq!(cards.len(), 2);
    let shown: String = cards.iter().filter_map(card_body).collect();
    assert_eq!(shown, answer);
    assert_eq!(
        h.sessions().history("om_long").last(),
        Some(&ChatMessage::assistant(answer))
    );
}
